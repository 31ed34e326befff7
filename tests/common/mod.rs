use std::net::SocketAddr;
use std::path::Path;

use bytes::Bytes;
use quorum_storage::LogEntry;
use quorum_storage::PeerId;
use quorum_storage::StorageConfig;

pub fn local_config(root: &Path) -> StorageConfig {
    StorageConfig {
        log_uri: format!("local://{}?segment_size=512", root.join("log").display()),
        stable_uri: format!("local://{}", root.join("meta").display()),
        snapshot_uri: format!("local://{}", root.join("snapshot").display()),
    }
}

/// One sled root serves log and stable state; snapshots sit beside them.
pub fn sled_config(root: &Path) -> StorageConfig {
    let uri = format!("sled://{}", root.join("sled").display());
    StorageConfig {
        log_uri: uri.clone(),
        stable_uri: uri.clone(),
        snapshot_uri: uri,
    }
}

pub fn disk_configs(root: &Path) -> Vec<(&'static str, StorageConfig)> {
    vec![("local", local_config(root)), ("sled", sled_config(root))]
}

pub fn peer(port: u16) -> PeerId {
    PeerId::new(SocketAddr::from(([127, 0, 0, 1], port)), 0)
}

pub fn data_entry(
    index: u64,
    term: u64,
) -> LogEntry {
    LogEntry::data(index, term, Bytes::from(format!("command-{index}")))
}
