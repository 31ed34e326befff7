use std::any::Any;
use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;
use tracing::info;

use crate::decide_commit;
use crate::downcast_handle;
use crate::local_source_path;
use crate::metrics::SNAPSHOT_COMMITS;
use crate::metrics::SNAPSHOT_OPEN_READERS;
use crate::utils::file_io::list_files_recursive;
use crate::utils::file_io::validate_relative_name;
use crate::CommitDecision;
use crate::Result;
use crate::SnapshotMeta;
use crate::SnapshotReader;
use crate::SnapshotStorage;
use crate::SnapshotWriter;
use crate::StorageError;
use crate::MEMORY_SCHEME;

#[derive(Debug)]
struct MemorySnapshot {
    meta: SnapshotMeta,
    files: BTreeMap<String, Bytes>,
}

/// Snapshots kept as shared immutable values; a reader holds its own `Arc`
/// so a later commit never disturbs it.
#[derive(Debug)]
pub struct MemorySnapshotStorage {
    id: String,
    name: String,
    latest: Mutex<Option<Arc<MemorySnapshot>>>,
    writer_in_flight: Arc<AtomicBool>,
}

pub struct MemorySnapshotWriter {
    store_id: String,
    name: String,
    meta: Option<SnapshotMeta>,
    files: BTreeMap<String, Bytes>,
    in_flight: Arc<AtomicBool>,
}

pub struct MemorySnapshotReader {
    store_id: String,
    name: String,
    snapshot: Arc<MemorySnapshot>,
}

impl MemorySnapshotStorage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: nanoid::nanoid!(),
            name: name.into(),
            latest: Mutex::new(None),
            writer_in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    fn take_writer(
        &self,
        writer: Box<dyn SnapshotWriter>,
    ) -> Result<Box<MemorySnapshotWriter>> {
        let writer = downcast_handle::<MemorySnapshotWriter>(writer.into_any(), "snapshot writer")?;
        if writer.store_id != self.id {
            return Err(StorageError::InvalidArgument("snapshot writer belongs to another storage".to_string()).into());
        }
        Ok(writer)
    }
}

impl SnapshotStorage for MemorySnapshotStorage {
    fn init(&self) -> Result<()> {
        Ok(())
    }

    fn create(&self) -> Result<Box<dyn SnapshotWriter>> {
        if self
            .writer_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(StorageError::InvalidArgument("a snapshot writer is already in flight".to_string()).into());
        }
        Ok(Box::new(MemorySnapshotWriter {
            store_id: self.id.clone(),
            name: self.name.clone(),
            meta: None,
            files: BTreeMap::new(),
            in_flight: self.writer_in_flight.clone(),
        }))
    }

    fn close_writer(
        &self,
        writer: Box<dyn SnapshotWriter>,
    ) -> Result<()> {
        let mut writer = self.take_writer(writer)?;
        let mut latest = self.latest.lock();
        let current = latest.as_ref().map(|s| s.meta.last_included_index);
        match decide_commit(writer.meta.as_ref(), current)? {
            CommitDecision::Discard => {
                debug!(name = %self.name, index = ?current, "snapshot at current index discarded");
            }
            CommitDecision::Publish => {
                let meta = writer.meta.take().ok_or_else(|| StorageError::InvalidArgument("missing meta".to_string()))?;
                info!(name = %self.name, index = meta.last_included_index, "snapshot committed");
                *latest = Some(Arc::new(MemorySnapshot {
                    meta,
                    files: std::mem::take(&mut writer.files),
                }));
                SNAPSHOT_COMMITS.with_label_values(&[MEMORY_SCHEME]).inc();
            }
        }
        Ok(())
    }

    fn abort_writer(
        &self,
        writer: Box<dyn SnapshotWriter>,
    ) -> Result<()> {
        self.take_writer(writer).map(|_| ())
    }

    fn open(&self) -> Result<Option<Box<dyn SnapshotReader>>> {
        let latest = self.latest.lock();
        Ok(latest.as_ref().map(|snapshot| {
            SNAPSHOT_OPEN_READERS.with_label_values(&[MEMORY_SCHEME]).inc();
            Box::new(MemorySnapshotReader {
                store_id: self.id.clone(),
                name: self.name.clone(),
                snapshot: snapshot.clone(),
            }) as Box<dyn SnapshotReader>
        }))
    }

    fn close_reader(
        &self,
        reader: Box<dyn SnapshotReader>,
    ) -> Result<()> {
        let reader = downcast_handle::<MemorySnapshotReader>(reader.into_any(), "snapshot reader")?;
        if reader.store_id != self.id {
            return Err(StorageError::InvalidArgument("snapshot reader belongs to another storage".to_string()).into());
        }
        SNAPSHOT_OPEN_READERS.with_label_values(&[MEMORY_SCHEME]).dec();
        Ok(())
    }
}

impl MemorySnapshotWriter {
    fn stage_file(
        &mut self,
        root: &Path,
        name: String,
    ) -> Result<()> {
        let path = root.join(&name);
        let data = fs::read(&path).map_err(|e| StorageError::at_path(&path, e))?;
        self.files.insert(name, Bytes::from(data));
        Ok(())
    }
}

impl SnapshotWriter for MemorySnapshotWriter {
    fn copy(
        &mut self,
        uri: &str,
    ) -> Result<()> {
        let src = Path::new(local_source_path(uri));
        let meta = fs::metadata(src).map_err(|e| StorageError::at_path(src, e))?;
        if meta.is_file() {
            let name = src
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| StorageError::InvalidArgument(format!("{src:?} has no file name")))?;
            let root = src.parent().unwrap_or_else(|| Path::new(""));
            return self.stage_file(root, name);
        }
        for name in list_files_recursive(src)? {
            self.stage_file(src, name)?;
        }
        Ok(())
    }

    fn write_file(
        &mut self,
        name: &str,
        data: &[u8],
    ) -> Result<()> {
        validate_relative_name(name)?;
        self.files.insert(name.to_string(), Bytes::copy_from_slice(data));
        Ok(())
    }

    fn save_meta(
        &mut self,
        meta: SnapshotMeta,
    ) -> Result<()> {
        self.meta = Some(meta);
        Ok(())
    }

    fn get_uri(
        &self,
        hint_addr: &SocketAddr,
    ) -> String {
        format!("{MEMORY_SCHEME}://{hint_addr}/{}/writer", self.name)
    }

    fn list_files(&self) -> Result<Vec<String>> {
        Ok(self.files.keys().cloned().collect())
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

impl Drop for MemorySnapshotWriter {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

impl SnapshotReader for MemorySnapshotReader {
    fn load_meta(&self) -> Result<SnapshotMeta> {
        Ok(self.snapshot.meta.clone())
    }

    fn get_uri(
        &self,
        hint_addr: &SocketAddr,
    ) -> String {
        format!(
            "{MEMORY_SCHEME}://{hint_addr}/{}/{}",
            self.name, self.snapshot.meta.last_included_index
        )
    }

    fn list_files(&self) -> Result<Vec<String>> {
        Ok(self.snapshot.files.keys().cloned().collect())
    }

    fn read_file(
        &self,
        name: &str,
    ) -> Result<Bytes> {
        self.snapshot
            .files
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("snapshot file {name:?}")).into())
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}
