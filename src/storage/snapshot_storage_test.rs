//! Reusable conformance suite for [`SnapshotStorage`] backends.

use std::fs;
use std::net::SocketAddr;

use tempfile::tempdir;

use crate::storage::log_storage_test::peer;
use crate::Configuration;
use crate::Error;
use crate::SnapshotMeta;
use crate::SnapshotStorage;

pub(crate) trait SnapshotStorageBuilder {
    /// Uninitialized store over a fresh location.
    fn build(&self) -> Result<Box<dyn SnapshotStorage>, Error>;

    /// Store over the same location as `store` after a restart.
    fn restart(
        &self,
        store: Box<dyn SnapshotStorage>,
    ) -> Result<Box<dyn SnapshotStorage>, Error> {
        Ok(store)
    }
}

pub(crate) struct SnapshotStorageTestSuite;

pub(crate) fn meta(index: u64) -> SnapshotMeta {
    SnapshotMeta {
        last_included_index: index,
        last_included_term: index / 10 + 1,
        last_configuration: Configuration::new([peer(1), peer(2), peer(3)]),
    }
}

fn open<B: SnapshotStorageBuilder>(builder: &B) -> Result<Box<dyn SnapshotStorage>, Error> {
    let store = builder.build()?;
    store.init()?;
    Ok(store)
}

/// Commit a snapshot at `index` holding one file `data` with `content`.
pub(crate) fn commit(
    store: &dyn SnapshotStorage,
    index: u64,
    content: &str,
) -> Result<(), Error> {
    let mut writer = store.create()?;
    writer.write_file("data", content.as_bytes())?;
    writer.save_meta(meta(index))?;
    store.close_writer(writer)
}

impl SnapshotStorageTestSuite {
    pub(crate) fn run_all_tests<B: SnapshotStorageBuilder>(builder: B) -> Result<(), Error> {
        Self::test_empty(open(&builder)?)?;
        Self::test_commit_and_open(open(&builder)?)?;
        Self::test_single_writer(open(&builder)?)?;
        Self::test_commit_rules(open(&builder)?)?;
        Self::test_reader_isolation(open(&builder)?)?;
        Self::test_copy_sources(open(&builder)?)?;
        Self::test_foreign_handles(&builder)?;
        Self::test_restart_keeps_latest(&builder)?;
        Ok(())
    }

    fn test_empty(store: Box<dyn SnapshotStorage>) -> Result<(), Error> {
        assert!(store.open()?.is_none());
        Ok(())
    }

    fn test_commit_and_open(store: Box<dyn SnapshotStorage>) -> Result<(), Error> {
        let mut writer = store.create()?;
        writer.write_file("data", b"state@10")?;
        writer.write_file("nested/extra", b"more")?;
        writer.save_meta(meta(10))?;
        assert_eq!(writer.list_files()?, vec!["data".to_string(), "nested/extra".to_string()]);
        store.close_writer(writer)?;

        let reader = store.open()?.expect("snapshot committed");
        assert_eq!(reader.load_meta()?, meta(10));
        assert_eq!(reader.list_files()?, vec!["data".to_string(), "nested/extra".to_string()]);
        assert_eq!(&reader.read_file("data")?[..], b"state@10");
        assert!(reader.read_file("missing").unwrap_err().is_not_found());

        let hint: SocketAddr = "10.0.0.1:8100".parse().unwrap();
        assert!(reader.get_uri(&hint).contains("10.0.0.1:8100"));
        store.close_reader(reader)?;
        Ok(())
    }

    fn test_single_writer(store: Box<dyn SnapshotStorage>) -> Result<(), Error> {
        let writer = store.create()?;
        let err = store.create().err().expect("second writer rejected");
        assert!(err.is_invalid_argument(), "{err:?}");

        store.abort_writer(writer)?;
        let writer = store.create()?;

        // Closing without meta is rejected but frees the slot.
        let err = store.close_writer(writer).unwrap_err();
        assert!(err.is_invalid_argument(), "{err:?}");
        assert!(store.open()?.is_none());

        let writer = store.create()?;
        drop(writer);
        store.create().map(drop)?;
        Ok(())
    }

    fn test_commit_rules(store: Box<dyn SnapshotStorage>) -> Result<(), Error> {
        commit(&*store, 20, "twenty")?;

        let err = commit(&*store, 10, "ten").unwrap_err();
        assert!(err.is_invalid_argument(), "{err:?}");

        // Same index: discarded, not an error.
        commit(&*store, 20, "twenty again")?;

        let reader = store.open()?.expect("snapshot committed");
        assert_eq!(reader.load_meta()?.last_included_index, 20);
        assert_eq!(&reader.read_file("data")?[..], b"twenty");
        store.close_reader(reader)?;

        commit(&*store, 30, "thirty")?;
        let reader = store.open()?.expect("snapshot committed");
        assert_eq!(reader.load_meta()?.last_included_index, 30);
        store.close_reader(reader)?;
        Ok(())
    }

    fn test_reader_isolation(store: Box<dyn SnapshotStorage>) -> Result<(), Error> {
        commit(&*store, 10, "old")?;
        let old_reader = store.open()?.expect("snapshot committed");

        commit(&*store, 20, "new")?;
        assert_eq!(old_reader.load_meta()?.last_included_index, 10);
        assert_eq!(&old_reader.read_file("data")?[..], b"old");

        let new_reader = store.open()?.expect("snapshot committed");
        assert_eq!(new_reader.load_meta()?.last_included_index, 20);

        store.close_reader(old_reader)?;
        assert_eq!(&new_reader.read_file("data")?[..], b"new");
        store.close_reader(new_reader)?;
        Ok(())
    }

    fn test_copy_sources(store: Box<dyn SnapshotStorage>) -> Result<(), Error> {
        let source = tempdir()?;
        fs::create_dir_all(source.path().join("dir/sub"))?;
        fs::write(source.path().join("dir/a"), b"a")?;
        fs::write(source.path().join("dir/sub/b"), b"b")?;
        fs::write(source.path().join("single"), b"single")?;

        let mut writer = store.create()?;
        writer.copy(&source.path().join("dir").to_string_lossy())?;
        writer.copy(&format!("file://{}", source.path().join("single").display()))?;
        assert!(writer
            .copy(&source.path().join("absent").to_string_lossy())
            .is_err());
        writer.save_meta(meta(5))?;
        store.close_writer(writer)?;

        let reader = store.open()?.expect("snapshot committed");
        assert_eq!(
            reader.list_files()?,
            vec!["a".to_string(), "single".to_string(), "sub/b".to_string()]
        );
        assert_eq!(&reader.read_file("sub/b")?[..], b"b");
        assert_eq!(&reader.read_file("single")?[..], b"single");
        store.close_reader(reader)?;
        Ok(())
    }

    fn test_foreign_handles<B: SnapshotStorageBuilder>(builder: &B) -> Result<(), Error> {
        let store = open(builder)?;
        let other = open(builder)?;
        commit(&*other, 1, "other")?;

        let writer = other.create()?;
        let err = store.close_writer(writer).unwrap_err();
        assert!(err.is_invalid_argument(), "{err:?}");

        let reader = other.open()?.expect("snapshot committed");
        let err = store.close_reader(reader).unwrap_err();
        assert!(err.is_invalid_argument(), "{err:?}");
        Ok(())
    }

    fn test_restart_keeps_latest<B: SnapshotStorageBuilder>(builder: &B) -> Result<(), Error> {
        let store = open(builder)?;
        commit(&*store, 10, "ten")?;
        commit(&*store, 20, "twenty")?;

        // An abandoned writer must not survive a restart.
        let mut writer = store.create()?;
        writer.write_file("data", b"half written")?;
        drop(writer);

        let store = builder.restart(store)?;
        store.init()?;
        let reader = store.open()?.expect("snapshot survives restart");
        assert_eq!(reader.load_meta()?, meta(20));
        assert_eq!(&reader.read_file("data")?[..], b"twenty");
        store.close_reader(reader)?;

        let writer = store.create()?;
        assert!(writer.list_files()?.is_empty());
        store.abort_writer(writer)?;
        Ok(())
    }
}
