//! Snapshot writer/reader lifecycle.
//!
//! A [`SnapshotStorage`] hands out at most one [`SnapshotWriter`] at a time
//! and any number of [`SnapshotReader`]s. Committing a writer publishes it as
//! the latest snapshot without disturbing readers opened earlier.

use std::any::Any;
use std::net::SocketAddr;

use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;

use super::Configuration;
use crate::Result;
use crate::StorageError;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub last_included_index: u64,
    pub last_included_term: u64,
    pub last_configuration: Configuration,
}

/// Staging area of a snapshot under construction.
pub trait SnapshotWriter: Send + 'static {
    /// Stage external state given as a path or `file://` URI. Files land
    /// under their own name; a directory contributes its children.
    fn copy(
        &mut self,
        uri: &str,
    ) -> Result<()>;

    /// Stage `data` as the file `name` (relative, `/`-separated).
    fn write_file(
        &mut self,
        name: &str,
        data: &[u8],
    ) -> Result<()>;

    fn save_meta(
        &mut self,
        meta: SnapshotMeta,
    ) -> Result<()>;

    /// Locator a peer at `hint_addr` can use to fetch this data.
    fn get_uri(
        &self,
        hint_addr: &SocketAddr,
    ) -> String;

    fn list_files(&self) -> Result<Vec<String>>;

    /// Hands the concrete writer back to the store that created it.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

/// Read-only view of one committed snapshot.
pub trait SnapshotReader: Send + 'static {
    fn load_meta(&self) -> Result<SnapshotMeta>;

    fn get_uri(
        &self,
        hint_addr: &SocketAddr,
    ) -> String;

    fn list_files(&self) -> Result<Vec<String>>;

    fn read_file(
        &self,
        name: &str,
    ) -> Result<Bytes>;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

pub trait SnapshotStorage: Send + Sync + 'static {
    /// Validate the committed snapshot and clean up leftovers of a crash.
    fn init(&self) -> Result<()>;

    /// Start a new snapshot. Fails while another writer is in flight.
    fn create(&self) -> Result<Box<dyn SnapshotWriter>>;

    /// Commit `writer` as the latest snapshot.
    ///
    /// A writer without meta, or older than the current snapshot, is
    /// discarded and rejected. One at the current index is discarded and
    /// accepted.
    fn close_writer(
        &self,
        writer: Box<dyn SnapshotWriter>,
    ) -> Result<()>;

    /// Discard `writer` without committing.
    fn abort_writer(
        &self,
        writer: Box<dyn SnapshotWriter>,
    ) -> Result<()>;

    /// Reader over the latest committed snapshot, `None` before the first
    /// commit.
    fn open(&self) -> Result<Option<Box<dyn SnapshotReader>>>;

    fn close_reader(
        &self,
        reader: Box<dyn SnapshotReader>,
    ) -> Result<()>;
}

/// How a commit relates to the current latest snapshot.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum CommitDecision {
    Publish,
    /// Same index as the current snapshot; drop silently.
    Discard,
}

pub(crate) fn decide_commit(
    meta: Option<&SnapshotMeta>,
    current_index: Option<u64>,
) -> Result<CommitDecision> {
    let meta = meta.ok_or_else(|| StorageError::InvalidArgument("snapshot writer closed without meta".to_string()))?;
    match current_index {
        Some(current) if meta.last_included_index < current => Err(StorageError::InvalidArgument(format!(
            "snapshot at {} is older than current snapshot at {current}",
            meta.last_included_index
        ))
        .into()),
        Some(current) if meta.last_included_index == current => Ok(CommitDecision::Discard),
        _ => Ok(CommitDecision::Publish),
    }
}

/// Recover the concrete type behind a trait object handed back by a caller.
pub(crate) fn downcast_handle<T: Any>(
    handle: Box<dyn Any + Send>,
    what: &str,
) -> Result<Box<T>> {
    handle
        .downcast::<T>()
        .map_err(|_| StorageError::InvalidArgument(format!("{what} was not created by this snapshot storage")).into())
}

/// Strip an optional `file://` prefix from a copy source.
pub(crate) fn local_source_path(uri: &str) -> &str {
    uri.strip_prefix("file://").unwrap_or(uri)
}
