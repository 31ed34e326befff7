use std::str::FromStr;

use super::*;
use crate::storage::log_storage_test::peer;

#[test]
fn test_peer_id_text_form() {
    let p = PeerId::from_str("127.0.0.1:8080:2").unwrap();
    assert_eq!(p.addr.port(), 8080);
    assert_eq!(p.idx, 2);
    assert_eq!(p.to_string(), "127.0.0.1:8080:2");

    let bare = PeerId::from_str("127.0.0.1:8080").unwrap();
    assert_eq!(bare.idx, 0);

    let v6 = PeerId::from_str("[::1]:9000:1").unwrap();
    assert!(v6.addr.is_ipv6());
    assert_eq!(v6.idx, 1);
}

#[test]
fn test_peer_id_rejects_garbage() {
    for s in ["", "localhost", "127.0.0.1", "127.0.0.1:80:x", "1.2.3.4:99999"] {
        assert!(PeerId::from_str(s).unwrap_err().is_invalid_argument(), "{s}");
    }
}

#[test]
fn test_configuration_text_form() {
    let conf = Configuration::from_str("127.0.0.1:2:0, 127.0.0.1:1:0,127.0.0.1:1:0").unwrap();
    assert_eq!(conf.len(), 2);
    assert_eq!(conf.to_string(), "127.0.0.1:1:0,127.0.0.1:2:0");
    assert!(Configuration::from_str("").unwrap().is_empty());
    assert!(Configuration::from_str("127.0.0.1:1,bogus").is_err());
}

#[test]
fn test_configuration_membership() {
    let mut conf = Configuration::new([peer(1)]);
    assert!(conf.add_peer(peer(2)));
    assert!(!conf.add_peer(peer(2)));
    assert!(conf.contains(&peer(2)));
    assert!(conf.remove_peer(&peer(1)));
    assert_eq!(conf.peers().copied().collect::<Vec<_>>(), vec![peer(2)]);
}

#[test]
fn test_history_effective_at() {
    let mut history = ConfigurationHistory::new();
    history.apply(3, Configuration::new([peer(1)]));
    history.apply(8, Configuration::new([peer(1), peer(2)]));

    assert_eq!(history.effective_at(2), None);
    assert_eq!(history.effective_at(5), Some(&Configuration::new([peer(1)])));
    assert_eq!(history.effective_at(8).map(Configuration::len), Some(2));
    assert_eq!(history.indexes(), vec![3, 8]);
}

#[test]
fn test_history_replay_overwrites_later_indexes() {
    let mut history = ConfigurationHistory::new();
    history.apply(3, Configuration::new([peer(1)]));
    history.apply(8, Configuration::new([peer(2)]));
    history.apply(5, Configuration::new([peer(3)]));

    assert_eq!(history.indexes(), vec![3, 5]);
    assert_eq!(history.last(), Some(&(5, Configuration::new([peer(3)]))));
}
