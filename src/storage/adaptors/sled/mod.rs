//! Embedded key-value backends registered under `sled://<dir>`.
//!
//! Each store opens its own sled database under the root directory
//! (`raft_log/`, `state_storage/`); snapshots live in plain files under
//! `snapshot/` through the local snapshot store.

mod sled_log_storage;
mod sled_stable_storage;

use std::path::Path;

pub use sled_log_storage::*;
pub use sled_stable_storage::*;
use tracing::debug;
use tracing::warn;

use crate::constants::DEFAULT_SLED_CACHE_CAPACITY;
use crate::Result;
use crate::StorageUri;


#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SledOptions {
    /// `flush()` after every mutation
    pub sync: bool,
    pub cache_capacity: u64,
}

impl Default for SledOptions {
    fn default() -> Self {
        Self {
            sync: true,
            cache_capacity: DEFAULT_SLED_CACHE_CAPACITY,
        }
    }
}

impl SledOptions {
    /// `sled://<dir>?sync=<bool>&cache_capacity=<bytes>`
    pub fn from_uri(uri: &StorageUri) -> Result<Self> {
        Ok(Self {
            sync: uri.sync()?,
            cache_capacity: uri.param_or("cache_capacity", DEFAULT_SLED_CACHE_CAPACITY)?,
        })
    }
}

pub(crate) fn open_sled_db(
    path: &Path,
    options: &SledOptions,
) -> Result<sled::Db> {
    debug!("open sled db at: {:?}", path);

    sled::Config::default()
        .path(path)
        .cache_capacity(options.cache_capacity)
        .use_compression(true)
        .compression_factor(1)
        .open()
        .map_err(|e| {
            warn!("Try to open DB at this location: {:?} and failed: {:?}", path, e);
            e.into()
        })
}
