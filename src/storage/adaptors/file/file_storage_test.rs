use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use tempfile::TempDir;
use tracing_test::traced_test;

use super::FileStableStorage;
use super::LocalSnapshotReader;
use super::LocalSnapshotStorage;
use super::SegmentLogOptions;
use super::SegmentLogStorage;
use crate::constants::HARD_STATE_FILE;
use crate::constants::SNAPSHOT_META_FILE;
use crate::metrics::SNAPSHOT_OPEN_READERS;
use crate::storage::log_storage_test::peer;
use crate::storage::log_storage_test::LogStorageBuilder;
use crate::storage::log_storage_test::LogStorageTestSuite;
use crate::storage::snapshot_storage_test::commit;
use crate::storage::snapshot_storage_test::SnapshotStorageBuilder;
use crate::storage::snapshot_storage_test::SnapshotStorageTestSuite;
use crate::storage::stable_storage_test::StableStorageBuilder;
use crate::storage::stable_storage_test::StableStorageTestSuite;
use crate::Error;
use crate::LogStorage;
use crate::SnapshotStorage;
use crate::StableStorage;
use crate::LOCAL_SCHEME;

/// Hands out a fresh sub-directory per `build`; `restart` reuses the last one.
struct LocalBuilder {
    root: TempDir,
    seq: AtomicUsize,
    segment_size: u64,
}

impl LocalBuilder {
    fn new(segment_size: u64) -> Self {
        Self {
            root: TempDir::new().expect("temp dir"),
            seq: AtomicUsize::new(0),
            segment_size,
        }
    }

    fn next_dir(&self) -> PathBuf {
        let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.root.path().join(format!("store-{n}"))
    }

    fn current_dir(&self) -> PathBuf {
        self.root.path().join(format!("store-{}", self.seq.load(Ordering::SeqCst)))
    }

    fn log_options(&self) -> SegmentLogOptions {
        SegmentLogOptions {
            sync: true,
            segment_size: self.segment_size,
        }
    }
}

impl LogStorageBuilder for LocalBuilder {
    fn build(&self) -> Result<Box<dyn LogStorage>, Error> {
        Ok(Box::new(SegmentLogStorage::new(self.next_dir(), self.log_options())))
    }

    fn restart(
        &self,
        store: Box<dyn LogStorage>,
    ) -> Result<Box<dyn LogStorage>, Error> {
        drop(store);
        Ok(Box::new(SegmentLogStorage::new(self.current_dir(), self.log_options())))
    }
}

impl StableStorageBuilder for LocalBuilder {
    fn build(&self) -> Result<Box<dyn StableStorage>, Error> {
        Ok(Box::new(FileStableStorage::new(self.next_dir(), true)))
    }

    fn restart(
        &self,
        store: Box<dyn StableStorage>,
    ) -> Result<Box<dyn StableStorage>, Error> {
        drop(store);
        Ok(Box::new(FileStableStorage::new(self.current_dir(), true)))
    }
}

impl SnapshotStorageBuilder for LocalBuilder {
    fn build(&self) -> Result<Box<dyn SnapshotStorage>, Error> {
        Ok(Box::new(LocalSnapshotStorage::new(self.next_dir(), true)))
    }

    fn restart(
        &self,
        store: Box<dyn SnapshotStorage>,
    ) -> Result<Box<dyn SnapshotStorage>, Error> {
        drop(store);
        Ok(Box::new(LocalSnapshotStorage::new(self.current_dir(), true)))
    }
}

#[test]
#[traced_test]
fn test_segment_log_storage() -> Result<(), Error> {
    LogStorageTestSuite::run_all_tests(LocalBuilder::new(crate::constants::DEFAULT_SEGMENT_SIZE))
}

#[test]
#[traced_test]
fn test_segment_log_storage_with_tiny_segments() -> Result<(), Error> {
    LogStorageTestSuite::run_all_tests(LocalBuilder::new(256))
}

#[test]
#[traced_test]
fn test_file_stable_storage() -> Result<(), Error> {
    StableStorageTestSuite::run_all_tests(LocalBuilder::new(0))
}

#[test]
#[traced_test]
fn test_local_snapshot_storage() -> Result<(), Error> {
    SnapshotStorageTestSuite::run_all_tests(LocalBuilder::new(0))
}

#[test]
#[traced_test]
fn test_stable_storage_ignores_stray_temp_file() -> Result<(), Error> {
    let dir = TempDir::new()?;
    let store = FileStableStorage::new(dir.path(), true);
    store.init()?;
    store.set_term_and_votedfor(4, &peer(7000))?;
    drop(store);

    // A crash between writing the temp file and the rename.
    fs::write(dir.path().join(format!("{HARD_STATE_FILE}.tmp")), b"half a record")?;

    let store = FileStableStorage::new(dir.path(), true);
    store.init()?;
    assert_eq!(store.get_term()?, 4);
    assert_eq!(store.get_votedfor()?, Some(peer(7000)));
    assert!(!dir.path().join(format!("{HARD_STATE_FILE}.tmp")).exists());
    Ok(())
}

#[test]
fn test_stable_storage_detects_corruption() -> Result<(), Error> {
    let dir = TempDir::new()?;
    let store = FileStableStorage::new(dir.path(), true);
    store.init()?;
    store.set_term(9)?;
    drop(store);

    let path = dir.path().join(HARD_STATE_FILE);
    let mut bytes = fs::read(&path)?;
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    fs::write(&path, bytes)?;

    let store = FileStableStorage::new(dir.path(), true);
    let err = store.init().unwrap_err();
    assert!(err.is_corruption(), "{err:?}");
    Ok(())
}

#[test]
fn test_stable_storage_requires_init() {
    let dir = TempDir::new().unwrap();
    let store = FileStableStorage::new(dir.path(), true);
    assert!(store.set_term(1).unwrap_err().is_invalid_argument());
    assert!(store.get_term().unwrap_err().is_invalid_argument());
}

#[test]
fn test_snapshot_uri_points_at_committed_directory() -> Result<(), Error> {
    let dir = TempDir::new()?;
    let store = LocalSnapshotStorage::new(dir.path(), true);
    store.init()?;
    commit(&store, 12, "x")?;

    let reader = store.open()?.expect("committed");
    let hint: SocketAddr = "192.168.1.5:9000".parse().unwrap();
    let uri = reader.get_uri(&hint);
    let canonical = fs::canonicalize(dir.path())?;
    assert_eq!(
        uri,
        format!(
            "remote://192.168.1.5:9000{}",
            canonical.join("snapshot_00000000000000000012").display()
        )
    );
    store.close_reader(reader)?;
    Ok(())
}

#[test]
#[traced_test]
fn test_snapshot_init_keeps_only_latest() -> Result<(), Error> {
    let dir = TempDir::new()?;
    let store = LocalSnapshotStorage::new(dir.path(), true);
    store.init()?;
    commit(&store, 10, "ten")?;
    let reader = store.open()?.expect("committed");
    commit(&store, 20, "twenty")?;
    // Reader still pins snapshot 10 when the process dies.
    std::mem::forget(reader);
    drop(store);

    assert!(dir.path().join("snapshot_00000000000000000010").exists());
    let store = LocalSnapshotStorage::new(dir.path(), true);
    store.init()?;
    assert!(!dir.path().join("snapshot_00000000000000000010").exists());
    assert!(dir.path().join("snapshot_00000000000000000020").exists());
    assert_eq!(store.latest_index(), Some(20));
    Ok(())
}

#[test]
#[traced_test]
fn test_closing_released_reader_leaves_gauge_alone() -> Result<(), Error> {
    let dir = TempDir::new()?;
    let store = LocalSnapshotStorage::new(dir.path(), true);
    store.init()?;
    commit(&store, 4, "four")?;

    let reader = store
        .open()?
        .expect("committed")
        .into_any()
        .downcast::<LocalSnapshotReader>()
        .expect("local reader");
    let stale = reader.clone();
    store.close_reader(reader)?;
    store.close_reader(stale)?;

    assert!(logs_contain("closing a reader that was not tracked"));
    // Every other open reader in this process was counted before it is
    // released, so an unmatched decrement is the only way below zero.
    assert!(SNAPSHOT_OPEN_READERS.with_label_values(&[LOCAL_SCHEME]).get() >= 0);
    assert!(dir.path().join("snapshot_00000000000000000004").exists());
    Ok(())
}

#[test]
fn test_snapshot_init_rejects_missing_meta() -> Result<(), Error> {
    let dir = TempDir::new()?;
    let store = LocalSnapshotStorage::new(dir.path(), true);
    store.init()?;
    commit(&store, 3, "three")?;
    drop(store);

    fs::remove_file(dir.path().join("snapshot_00000000000000000003").join(SNAPSHOT_META_FILE))?;
    let store = LocalSnapshotStorage::new(dir.path(), true);
    let err = store.init().unwrap_err();
    assert!(err.is_corruption(), "{err:?}");
    Ok(())
}

#[test]
fn test_snapshot_meta_file_is_hidden_from_listing() -> Result<(), Error> {
    let dir = TempDir::new()?;
    let store = LocalSnapshotStorage::new(dir.path(), true);
    store.init()?;

    let mut writer = store.create()?;
    writer.write_file("state", b"abc")?;
    writer.save_meta(crate::storage::snapshot_storage_test::meta(1))?;
    assert_eq!(writer.list_files()?, vec!["state".to_string()]);
    assert!(writer.write_file("../escape", b"x").unwrap_err().is_invalid_argument());
    store.close_writer(writer)?;

    let reader = store.open()?.expect("committed");
    assert_eq!(reader.list_files()?, vec!["state".to_string()]);
    assert!(reader.read_file("/etc/passwd").unwrap_err().is_invalid_argument());
    store.close_reader(reader)?;
    Ok(())
}

#[test]
fn test_snapshot_requires_init() {
    let dir = TempDir::new().unwrap();
    let store = LocalSnapshotStorage::new(dir.path(), true);
    assert!(store.create().err().unwrap().is_invalid_argument());
    assert!(store.open().err().unwrap().is_invalid_argument());
}
