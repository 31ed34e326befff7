use super::convert::entry_key;
use super::convert::entry_key_to_index;
use super::convert::safe_kv;
use super::convert::safe_vk;
use crate::ConvertError;
use crate::Error;
use crate::StorageError;

#[test]
fn test_safe_kv_roundtrip_edges() {
    for i in [0, 1, 25, u32::MAX as u64, u64::MAX] {
        assert_eq!(i, safe_vk(safe_kv(i)).unwrap());
    }
}

#[test]
fn test_safe_vk_rejects_wrong_length() {
    let err = safe_vk([1u8, 2, 3]).unwrap_err();
    assert!(matches!(
        err,
        Error::Storage(StorageError::Convert(ConvertError::InvalidLength(3)))
    ));
}

#[test]
fn test_entry_keys_sort_by_index() {
    let mut keys: Vec<[u8; 9]> = [300u64, 2, 256, 1].iter().map(|i| entry_key(*i)).collect();
    keys.sort();
    let indexes: Vec<u64> = keys.iter().map(|k| entry_key_to_index(k).unwrap()).collect();
    assert_eq!(indexes, vec![1, 2, 256, 300]);
}

#[test]
fn test_entry_key_to_index_rejects_metadata_keys() {
    assert!(entry_key_to_index(b"m:first_log_index").is_err());
    assert!(entry_key_to_index([0u8; 0]).is_err());
}
