//! Directory-per-snapshot store registered under `local://`.
//!
//! Layout under the root directory:
//! - `temp/`: working area of the single in-flight writer
//! - `snapshot_<index:020>/`: committed snapshots, each with a checksummed
//!   `__raft_snapshot_meta` file next to the user files
//!
//! Commit renames `temp` to its final name, so a crash leaves either the
//! previous latest snapshot or the new one.

use std::any::Any;
use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::constants::SNAPSHOT_DIR_PREFIX;
use crate::constants::SNAPSHOT_META_FILE;
use crate::constants::SNAPSHOT_TEMP_DIR;
use crate::decide_commit;
use crate::downcast_handle;
use crate::local_source_path;
use crate::metrics::SNAPSHOT_COMMITS;
use crate::metrics::SNAPSHOT_OPEN_READERS;
use crate::utils::file_io::copy_into;
use crate::utils::file_io::create_dir_if_not_exist;
use crate::utils::file_io::encode_checksummed;
use crate::utils::file_io::fsync_dir;
use crate::utils::file_io::list_files_recursive;
use crate::utils::file_io::read_checksummed_file;
use crate::utils::file_io::remove_dir_if_exists;
use crate::utils::file_io::sync_tree;
use crate::utils::file_io::validate_relative_name;
use crate::utils::file_io::write_atomic;
use crate::CommitDecision;
use crate::Result;
use crate::SnapshotMeta;
use crate::SnapshotReader;
use crate::SnapshotStorage;
use crate::SnapshotWriter;
use crate::StorageError;
use crate::StorageUri;
use crate::LOCAL_SCHEME;

const REMOTE_URI_PREFIX: &str = "remote://";

#[derive(Debug)]
pub struct LocalSnapshotStorage {
    id: String,
    dir: PathBuf,
    sync: bool,
    state: Mutex<LocalSnapshotState>,
    writer_in_flight: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
struct LocalSnapshotState {
    /// Canonical form of `dir`, known once initialized
    root: Option<PathBuf>,
    latest: Option<u64>,
    /// Open readers per snapshot index
    readers: HashMap<u64, usize>,
}

#[derive(Debug)]
pub struct LocalSnapshotWriter {
    store_id: String,
    path: PathBuf,
    meta: Option<SnapshotMeta>,
    sync: bool,
    in_flight: Arc<AtomicBool>,
}

#[derive(Debug)]
#[cfg_attr(test, derive(Clone))]
pub struct LocalSnapshotReader {
    store_id: String,
    index: u64,
    path: PathBuf,
    meta: SnapshotMeta,
}

fn snapshot_dir(
    root: &Path,
    index: u64,
) -> PathBuf {
    root.join(format!("{SNAPSHOT_DIR_PREFIX}{index:020}"))
}

fn write_snapshot_meta(
    dir: &Path,
    meta: &SnapshotMeta,
    sync: bool,
) -> Result<()> {
    let bytes = bincode::serialize(meta)?;
    write_atomic(&dir.join(SNAPSHOT_META_FILE), &encode_checksummed(&bytes), sync)
}

fn read_snapshot_meta(dir: &Path) -> Result<SnapshotMeta> {
    let path = dir.join(SNAPSHOT_META_FILE);
    let bytes = read_checksummed_file(&path)?
        .ok_or_else(|| StorageError::corruption(path.display().to_string(), "snapshot meta is missing"))?;
    bincode::deserialize(&bytes).map_err(|e| {
        StorageError::corruption(path.display().to_string(), format!("undecodable snapshot meta: {e}")).into()
    })
}

fn user_files(dir: &Path) -> Result<Vec<String>> {
    let mut files = list_files_recursive(dir)?;
    files.retain(|f| f != SNAPSHOT_META_FILE);
    Ok(files)
}

fn remote_uri(
    hint_addr: &SocketAddr,
    path: &Path,
) -> String {
    format!("{REMOTE_URI_PREFIX}{hint_addr}{}", path.display())
}

fn discard_dir(path: &Path) {
    if let Err(e) = remove_dir_if_exists(path) {
        warn!(?path, "failed to remove snapshot directory: {:?}", e);
    }
}

impl LocalSnapshotStorage {
    pub fn new(
        dir: impl Into<PathBuf>,
        sync: bool,
    ) -> Self {
        Self {
            id: nanoid::nanoid!(),
            dir: dir.into(),
            sync,
            state: Mutex::new(LocalSnapshotState::default()),
            writer_in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_uri(uri: &StorageUri) -> Result<Self> {
        Ok(Self::new(uri.dir()?, uri.sync()?))
    }

    /// Index of the latest committed snapshot.
    pub fn latest_index(&self) -> Option<u64> {
        self.state.lock().latest
    }

    fn root(state: &LocalSnapshotState) -> Result<&Path> {
        state
            .root
            .as_deref()
            .ok_or_else(|| StorageError::InvalidArgument("snapshot storage used before init".to_string()).into())
    }

    fn take_writer(
        &self,
        writer: Box<dyn SnapshotWriter>,
    ) -> Result<Box<LocalSnapshotWriter>> {
        let writer = downcast_handle::<LocalSnapshotWriter>(writer.into_any(), "snapshot writer")?;
        if writer.store_id != self.id {
            return Err(StorageError::InvalidArgument("snapshot writer belongs to another storage".to_string()).into());
        }
        Ok(writer)
    }

    fn publish(
        &self,
        state: &mut LocalSnapshotState,
        writer: &LocalSnapshotWriter,
        index: u64,
    ) -> Result<()> {
        let root = Self::root(state)?.to_path_buf();
        if writer.sync {
            sync_tree(&writer.path)?;
        }
        let target = snapshot_dir(&root, index);
        remove_dir_if_exists(&target)?;
        fs::rename(&writer.path, &target).map_err(|e| StorageError::at_path(&target, e))?;
        fsync_dir(&root)?;

        let previous = state.latest.replace(index);
        info!(?target, "snapshot committed");
        SNAPSHOT_COMMITS.with_label_values(&[LOCAL_SCHEME]).inc();

        if let Some(previous) = previous {
            if !state.readers.contains_key(&previous) {
                debug!(previous, "removing superseded snapshot");
                discard_dir(&snapshot_dir(&root, previous));
            }
        }
        Ok(())
    }
}

impl SnapshotStorage for LocalSnapshotStorage {
    fn init(&self) -> Result<()> {
        create_dir_if_not_exist(&self.dir)?;
        let root = fs::canonicalize(&self.dir).map_err(|e| StorageError::at_path(&self.dir, e))?;
        let mut state = self.state.lock();

        let temp = root.join(SNAPSHOT_TEMP_DIR);
        if temp.exists() && !self.writer_in_flight.load(Ordering::Acquire) {
            warn!(?temp, "removing unfinished snapshot");
            remove_dir_if_exists(&temp)?;
        }

        let mut indexes = Vec::new();
        for entry in fs::read_dir(&root).map_err(|e| StorageError::at_path(&root, e))? {
            let path = entry.map_err(|e| StorageError::at_path(&root, e))?.path();
            let index = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix(SNAPSHOT_DIR_PREFIX))
                .and_then(|i| i.parse::<u64>().ok());
            match index {
                Some(index) if path.is_dir() => indexes.push(index),
                _ if path == temp => {}
                _ => warn!(?path, "ignoring unknown entry in snapshot directory"),
            }
        }
        indexes.sort_unstable();

        let latest = indexes.pop();
        for superseded in indexes {
            if !state.readers.contains_key(&superseded) {
                info!(superseded, "removing superseded snapshot");
                remove_dir_if_exists(&snapshot_dir(&root, superseded))?;
            }
        }
        if let Some(index) = latest {
            let path = snapshot_dir(&root, index);
            let meta = read_snapshot_meta(&path)?;
            if meta.last_included_index != index {
                return Err(StorageError::corruption(
                    path.display().to_string(),
                    format!("meta says index {}", meta.last_included_index),
                )
                .into());
            }
        }
        fsync_dir(&root)?;

        info!(?root, latest = ?latest, "snapshot storage ready");
        state.root = Some(root);
        state.latest = latest;
        Ok(())
    }

    fn create(&self) -> Result<Box<dyn SnapshotWriter>> {
        let state = self.state.lock();
        let path = Self::root(&state)?.join(SNAPSHOT_TEMP_DIR);
        if self
            .writer_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(StorageError::InvalidArgument("a snapshot writer is already in flight".to_string()).into());
        }

        // Dropping the writer on an error below frees the slot again.
        let writer = LocalSnapshotWriter {
            store_id: self.id.clone(),
            path,
            meta: None,
            sync: self.sync,
            in_flight: self.writer_in_flight.clone(),
        };
        remove_dir_if_exists(&writer.path)?;
        create_dir_if_not_exist(&writer.path)?;
        debug!(path = ?writer.path, "snapshot writer created");
        Ok(Box::new(writer))
    }

    fn close_writer(
        &self,
        writer: Box<dyn SnapshotWriter>,
    ) -> Result<()> {
        let writer = self.take_writer(writer)?;
        let mut state = self.state.lock();
        let decision = decide_commit(writer.meta.as_ref(), state.latest);
        match (decision, writer.meta.as_ref()) {
            (Ok(CommitDecision::Publish), Some(meta)) => {
                let index = meta.last_included_index;
                let published = self.publish(&mut state, &writer, index);
                if published.is_err() {
                    discard_dir(&writer.path);
                }
                published
            }
            (Ok(_), _) => {
                debug!(latest = ?state.latest, "snapshot at current index discarded");
                discard_dir(&writer.path);
                Ok(())
            }
            (Err(e), _) => {
                discard_dir(&writer.path);
                Err(e)
            }
        }
    }

    fn abort_writer(
        &self,
        writer: Box<dyn SnapshotWriter>,
    ) -> Result<()> {
        let writer = self.take_writer(writer)?;
        debug!(path = ?writer.path, "snapshot writer aborted");
        remove_dir_if_exists(&writer.path)
    }

    fn open(&self) -> Result<Option<Box<dyn SnapshotReader>>> {
        let mut state = self.state.lock();
        let root = Self::root(&state)?.to_path_buf();
        let Some(index) = state.latest else {
            return Ok(None);
        };
        let path = snapshot_dir(&root, index);
        let meta = read_snapshot_meta(&path)?;
        *state.readers.entry(index).or_insert(0) += 1;
        SNAPSHOT_OPEN_READERS.with_label_values(&[LOCAL_SCHEME]).inc();

        Ok(Some(Box::new(LocalSnapshotReader {
            store_id: self.id.clone(),
            index,
            path,
            meta,
        })))
    }

    fn close_reader(
        &self,
        reader: Box<dyn SnapshotReader>,
    ) -> Result<()> {
        let reader = downcast_handle::<LocalSnapshotReader>(reader.into_any(), "snapshot reader")?;
        if reader.store_id != self.id {
            return Err(StorageError::InvalidArgument("snapshot reader belongs to another storage".to_string()).into());
        }

        let mut state = self.state.lock();
        let remaining = match state.readers.get_mut(&reader.index) {
            Some(count) => {
                SNAPSHOT_OPEN_READERS.with_label_values(&[LOCAL_SCHEME]).dec();
                *count -= 1;
                *count
            }
            None => {
                warn!(index = reader.index, "closing a reader that was not tracked");
                0
            }
        };
        if remaining == 0 {
            state.readers.remove(&reader.index);
            if state.latest != Some(reader.index) {
                debug!(index = reader.index, "removing snapshot after its last reader closed");
                discard_dir(&reader.path);
            }
        }
        Ok(())
    }
}

impl SnapshotWriter for LocalSnapshotWriter {
    fn copy(
        &mut self,
        uri: &str,
    ) -> Result<()> {
        let src = Path::new(local_source_path(uri));
        let bytes = copy_into(src, &self.path)?;
        debug!(?src, bytes, "copied into snapshot");
        Ok(())
    }

    fn write_file(
        &mut self,
        name: &str,
        data: &[u8],
    ) -> Result<()> {
        validate_relative_name(name)?;
        let path = self.path.join(name);
        if let Some(parent) = path.parent() {
            create_dir_if_not_exist(parent)?;
        }
        fs::write(&path, data).map_err(|e| StorageError::at_path(&path, e).into())
    }

    fn save_meta(
        &mut self,
        meta: SnapshotMeta,
    ) -> Result<()> {
        write_snapshot_meta(&self.path, &meta, self.sync)?;
        self.meta = Some(meta);
        Ok(())
    }

    fn get_uri(
        &self,
        hint_addr: &SocketAddr,
    ) -> String {
        remote_uri(hint_addr, &self.path)
    }

    fn list_files(&self) -> Result<Vec<String>> {
        user_files(&self.path)
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

impl Drop for LocalSnapshotWriter {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

impl SnapshotReader for LocalSnapshotReader {
    fn load_meta(&self) -> Result<SnapshotMeta> {
        Ok(self.meta.clone())
    }

    fn get_uri(
        &self,
        hint_addr: &SocketAddr,
    ) -> String {
        remote_uri(hint_addr, &self.path)
    }

    fn list_files(&self) -> Result<Vec<String>> {
        user_files(&self.path)
    }

    fn read_file(
        &self,
        name: &str,
    ) -> Result<Bytes> {
        validate_relative_name(name)?;
        let path = self.path.join(name);
        match fs::read(&path) {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(format!("snapshot file {name:?}")).into())
            }
            Err(e) => Err(StorageError::at_path(&path, e).into()),
        }
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}
