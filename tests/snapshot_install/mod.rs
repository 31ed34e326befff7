use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use quorum_storage::open_node_storage;
use quorum_storage::Configuration;
use quorum_storage::ConfigurationHistory;
use quorum_storage::Error;
use quorum_storage::SnapshotMeta;
use quorum_storage::SnapshotStorage;
use tempfile::TempDir;

use crate::common::data_entry;
use crate::common::disk_configs;
use crate::common::local_config;
use crate::common::peer;

fn meta(index: u64) -> SnapshotMeta {
    SnapshotMeta {
        last_included_index: index,
        last_included_term: 2,
        last_configuration: Configuration::new([peer(9081), peer(9082)]),
    }
}

fn write_state_machine_dump(dir: &Path) -> Result<(), Error> {
    fs::create_dir_all(dir.join("tables"))?;
    fs::write(dir.join("manifest"), b"v1")?;
    fs::write(dir.join("tables").join("000001.sst"), vec![7u8; 4096])?;
    Ok(())
}

fn commit_from_dir(
    store: &dyn SnapshotStorage,
    dump: &Path,
    index: u64,
) -> Result<(), Error> {
    let mut writer = store.create()?;
    writer.copy(&format!("file://{}", dump.display()))?;
    writer.save_meta(meta(index))?;
    store.close_writer(writer)
}

#[test]
fn snapshot_then_compact_log() -> Result<(), Error> {
    let root = TempDir::new()?;
    let dump = root.path().join("dump");
    write_state_machine_dump(&dump)?;

    for (backend, config) in disk_configs(root.path()) {
        let node = open_node_storage(&config, &mut ConfigurationHistory::new())?;
        node.log.append_entries((1..=40).map(|i| data_entry(i, 2)).collect())?;
        commit_from_dir(node.snapshot.as_ref(), &dump, 30)?;
        node.log.truncate_prefix(31)?;
        drop(node);

        let node = open_node_storage(&config, &mut ConfigurationHistory::new())?;
        assert_eq!(node.log.first_log_index(), 31, "{backend}");
        assert_eq!(node.log.last_log_index(), 40, "{backend}");

        let reader = node.snapshot.open()?.expect("snapshot committed");
        assert_eq!(reader.load_meta()?, meta(30), "{backend}");
        assert_eq!(reader.list_files()?, vec!["manifest", "tables/000001.sst"], "{backend}");
        assert_eq!(reader.read_file("tables/000001.sst")?.len(), 4096, "{backend}");

        let hint: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        assert!(reader.get_uri(&hint).starts_with("remote://10.0.0.1:9000/"), "{backend}");
        node.snapshot.close_reader(reader)?;
    }
    Ok(())
}

#[test]
fn reader_outlives_newer_commit() -> Result<(), Error> {
    let root = TempDir::new()?;
    let config = local_config(root.path());
    let dump = root.path().join("dump");
    write_state_machine_dump(&dump)?;

    let node = open_node_storage(&config, &mut ConfigurationHistory::new())?;
    commit_from_dir(node.snapshot.as_ref(), &dump, 10)?;
    let old = node.snapshot.open()?.expect("first snapshot");

    let mut writer = node.snapshot.create()?;
    writer.write_file("manifest", b"v2")?;
    writer.save_meta(meta(20))?;
    node.snapshot.close_writer(writer)?;

    assert_eq!(old.read_file("manifest")?.as_ref(), b"v1");
    let new = node.snapshot.open()?.expect("second snapshot");
    assert_eq!(new.read_file("manifest")?.as_ref(), b"v2");
    node.snapshot.close_reader(old)?;
    node.snapshot.close_reader(new)?;

    let snapshots: Vec<_> = fs::read_dir(root.path().join("snapshot"))?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("snapshot_"))
        .collect();
    assert_eq!(snapshots, vec!["snapshot_00000000000000000020"]);
    Ok(())
}

#[test]
fn unfinished_snapshot_is_discarded_on_restart() -> Result<(), Error> {
    let root = TempDir::new()?;
    let config = local_config(root.path());
    let dump = root.path().join("dump");
    write_state_machine_dump(&dump)?;

    let node = open_node_storage(&config, &mut ConfigurationHistory::new())?;
    commit_from_dir(node.snapshot.as_ref(), &dump, 10)?;

    // Crash while the next snapshot is still being written.
    let mut writer = node.snapshot.create()?;
    writer.write_file("manifest", b"half")?;
    drop(writer);
    drop(node);

    let node = open_node_storage(&config, &mut ConfigurationHistory::new())?;
    assert!(!root.path().join("snapshot").join("temp").exists());
    let reader = node.snapshot.open()?.expect("previous snapshot kept");
    assert_eq!(reader.load_meta()?.last_included_index, 10);
    assert_eq!(reader.read_file("manifest")?.as_ref(), b"v1");
    node.snapshot.close_reader(reader)?;
    Ok(())
}
