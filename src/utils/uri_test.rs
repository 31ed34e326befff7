use super::uri::StorageUri;
use crate::Error;
use crate::RegistryError;

#[test]
fn test_parse_scheme_path_and_options() {
    let uri = StorageUri::parse("local:///var/raft/log?sync=false&segment_size=1024").unwrap();

    assert_eq!(uri.scheme(), "local");
    assert_eq!(uri.path(), "/var/raft/log");
    assert_eq!(uri.param("sync"), Some("false"));
    assert!(!uri.sync().unwrap());
    assert_eq!(uri.param_or::<u64>("segment_size", 0).unwrap(), 1024);
    assert_eq!(uri.param_or::<u64>("cache_capacity", 7).unwrap(), 7);
}

#[test]
fn test_relative_path_and_no_options() {
    let uri = StorageUri::parse("sled://data/node1").unwrap();

    assert_eq!(uri.scheme(), "sled");
    assert_eq!(uri.dir().unwrap(), std::path::PathBuf::from("data/node1"));
    assert!(uri.sync().unwrap());
}

#[test]
fn test_scheme_is_case_insensitive() {
    let uri = StorageUri::parse("MEMORY://x").unwrap();
    assert_eq!(uri.scheme(), "memory");
}

#[test]
fn test_missing_separator_is_rejected() {
    let err = StorageUri::parse("/var/raft/log").unwrap_err();
    assert!(matches!(err, Error::Registry(RegistryError::InvalidUri { .. })));
}

#[test]
fn test_empty_scheme_is_rejected() {
    assert!(StorageUri::parse("://x").is_err());
    assert_eq!(StorageUri::scheme_of("://x"), None);
}

#[test]
fn test_bad_option_value_is_invalid_argument() {
    let uri = StorageUri::parse("local://x?sync=maybe").unwrap();
    assert!(uri.sync().unwrap_err().is_invalid_argument());
}

#[test]
fn test_empty_dir_is_invalid_argument() {
    let uri = StorageUri::parse("local://").unwrap();
    assert!(uri.dir().unwrap_err().is_invalid_argument());
}

#[test]
fn test_display_normalizes_option_order() {
    let uri: StorageUri = "local://d?b=2&a=1".parse().unwrap();
    assert_eq!(uri.to_string(), "local://d?a=1&b=2");
}
