use std::path::PathBuf;
use std::time::Instant;

use autometrics::autometrics;
use parking_lot::Mutex;
use parking_lot::RwLock;
use sled::Batch;
use sled::Tree;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::instrument;
use tracing::trace;

use super::open_sled_db;
use super::SledOptions;
use crate::check_append_batch;
use crate::check_reset;
use crate::check_truncate_suffix;
use crate::constants::LOG_FIRST_INDEX_KEY;
use crate::constants::SLED_LOG_DB;
use crate::constants::SLED_LOG_TREE;
use crate::convert::entry_key;
use crate::convert::entry_key_to_index;
use crate::convert::safe_kv;
use crate::convert::safe_vk;
use crate::metrics::LOG_APPENDED_ENTRIES;
use crate::metrics::LOG_APPEND_FAILURES;
use crate::metrics::LOG_APPEND_LATENCY_MS;
use crate::metrics::LOG_TRUNCATIONS;
use crate::ConfigurationManager;
use crate::Error;
use crate::LogEntry;
use crate::LogStorage;
use crate::Result;
use crate::StorageError;
use crate::StorageUri;
use crate::API_SLO;
use crate::SLED_SCHEME;

/// Log kept in one sled tree. Every mutation is a single atomic batch,
/// flushed before returning when `sync` is set.
#[derive(Debug)]
pub struct SledLogStorage {
    root: PathBuf,
    options: SledOptions,
    state: RwLock<SledLogState>,
    write_lock: Mutex<()>,
    /// Makes the next flush fail after its batch was applied
    #[cfg(test)]
    pub(super) fail_flush: std::sync::atomic::AtomicBool,
}

#[derive(Debug)]
struct SledLogState {
    db: Option<(sled::Db, Tree)>,
    poisoned: Option<String>,
    first_log_index: u64,
    last_log_index: u64,
}

impl SledLogState {
    fn tree(&self) -> Result<&Tree> {
        if let Some(reason) = &self.poisoned {
            return Err(Error::Fatal(format!("log storage unusable until restart: {reason}")));
        }
        self.db
            .as_ref()
            .map(|(_, tree)| tree)
            .ok_or_else(|| StorageError::InvalidArgument("log storage used before init".to_string()).into())
    }

    fn in_range(
        &self,
        index: u64,
    ) -> bool {
        index >= self.first_log_index && index <= self.last_log_index
    }

    fn read(
        &self,
        index: u64,
    ) -> Result<Option<LogEntry>> {
        if !self.in_range(index) {
            return Ok(None);
        }
        let Some((_, tree)) = &self.db else {
            return Ok(None);
        };
        let bytes = tree
            .get(entry_key(index))?
            .ok_or_else(|| StorageError::corruption(SLED_LOG_TREE, format!("entry {index} missing")))?;
        decode_entry(index, &bytes).map(Some)
    }
}

fn decode_entry(
    index: u64,
    bytes: &[u8],
) -> Result<LogEntry> {
    let entry = LogEntry::decode(bytes)
        .map_err(|e| StorageError::corruption(SLED_LOG_TREE, format!("undecodable entry {index}: {e}")))?;
    if entry.index != index {
        return Err(StorageError::corruption(
            SLED_LOG_TREE,
            format!("key {index} holds entry {}", entry.index),
        )
        .into());
    }
    Ok(entry)
}

/// Queue removal of every entry key in `[from, to]`.
fn remove_range(
    tree: &Tree,
    batch: &mut Batch,
    from: u64,
    to: u64,
) -> Result<()> {
    if from > to {
        return Ok(());
    }
    for item in tree.range(entry_key(from)..=entry_key(to)) {
        let (key, _) = item?;
        batch.remove(key);
    }
    Ok(())
}

impl SledLogStorage {
    pub fn new(
        root: impl Into<PathBuf>,
        options: SledOptions,
    ) -> Self {
        Self {
            root: root.into(),
            options,
            state: RwLock::new(SledLogState {
                db: None,
                poisoned: None,
                first_log_index: 1,
                last_log_index: 0,
            }),
            write_lock: Mutex::new(()),
            #[cfg(test)]
            fail_flush: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn from_uri(uri: &StorageUri) -> Result<Self> {
        Ok(Self::new(uri.dir()?, SledOptions::from_uri(uri)?))
    }

    /// Apply `batch` atomically and make it durable per the sync policy.
    fn commit(
        &self,
        tree: &Tree,
        batch: Batch,
    ) -> Result<()> {
        tree.apply_batch(batch)?;
        #[cfg(test)]
        if self.fail_flush.swap(false, std::sync::atomic::Ordering::AcqRel) {
            let e = std::io::Error::new(std::io::ErrorKind::Other, "injected flush failure");
            return Err(sled::Error::Io(e).into());
        }
        if self.options.sync {
            tree.flush()?;
        }
        Ok(())
    }
}

impl LogStorage for SledLogStorage {
    #[instrument(skip(self, configuration_manager), fields(root = ?self.root))]
    fn init(
        &self,
        configuration_manager: &mut dyn ConfigurationManager,
    ) -> Result<()> {
        let _guard = self.write_lock.lock();
        let db = open_sled_db(&self.root.join(SLED_LOG_DB), &self.options)?;
        let tree = db.open_tree(SLED_LOG_TREE)?;

        let first_log_index = match tree.get(LOG_FIRST_INDEX_KEY)? {
            Some(bytes) => safe_vk(&bytes)?,
            None => 1,
        };
        if first_log_index == 0 {
            return Err(StorageError::corruption(SLED_LOG_TREE, "first_log_index is 0").into());
        }

        let mut last_log_index = first_log_index - 1;
        let mut configurations = Vec::new();
        for item in tree.range(entry_key(0)..=entry_key(u64::MAX)) {
            let (key, value) = item?;
            let index = entry_key_to_index(&key)?;
            if index != last_log_index + 1 {
                return Err(StorageError::corruption(
                    SLED_LOG_TREE,
                    format!("expected entry {}, found {index}", last_log_index + 1),
                )
                .into());
            }
            let entry = decode_entry(index, &value)?;
            if entry.is_configuration() {
                configurations.push(entry);
            }
            last_log_index = index;
        }

        for entry in configurations {
            if let Some(configuration) = entry.decode_configuration()? {
                configuration_manager.apply(entry.index, configuration);
            }
        }

        info!(first = first_log_index, last = last_log_index, "sled log ready");
        *self.state.write() = SledLogState {
            db: Some((db, tree)),
            poisoned: None,
            first_log_index,
            last_log_index,
        };
        Ok(())
    }

    fn first_log_index(&self) -> u64 {
        self.state.read().first_log_index
    }

    fn last_log_index(&self) -> u64 {
        self.state.read().last_log_index
    }

    #[autometrics(objective = API_SLO)]
    fn get_entry(
        &self,
        index: u64,
    ) -> Result<Option<LogEntry>> {
        self.state.read().read(index)
    }

    /// sled stores whole values, so this decodes the entry.
    fn get_term(
        &self,
        index: u64,
    ) -> Result<Option<u64>> {
        Ok(self.state.read().read(index)?.map(|e| e.term))
    }

    #[autometrics(objective = API_SLO)]
    #[instrument(skip(self, entries), fields(count = entries.len()))]
    fn append_entries(
        &self,
        entries: Vec<LogEntry>,
    ) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let started = Instant::now();
        let (tree, last_log_index) = {
            let state = self.state.read();
            let tree = state.tree()?.clone();
            let last_term = state.read(state.last_log_index)?.map(|e| e.term);
            check_append_batch(state.last_log_index, last_term, &entries)?;
            (tree, state.last_log_index)
        };
        if entries.is_empty() {
            return Ok(0);
        }

        let mut batch = Batch::default();
        for entry in &entries {
            batch.insert(&entry_key(entry.index)[..], entry.encode()?);
        }
        trace!("append_entries len = {}", entries.len());

        if let Err(e) = self.commit(&tree, batch) {
            // The batch may be applied without being durable.
            error!("sled append failed: {:?}", e);
            LOG_APPEND_FAILURES.with_label_values(&[SLED_SCHEME]).inc();
            self.state.write().poisoned = Some(format!("append failed: {e}"));
            return Err(e);
        }

        let count = entries.len();
        self.state.write().last_log_index = last_log_index + count as u64;
        LOG_APPENDED_ENTRIES.with_label_values(&[SLED_SCHEME]).inc_by(count as u64);
        LOG_APPEND_LATENCY_MS
            .with_label_values(&[SLED_SCHEME])
            .observe(started.elapsed().as_secs_f64() * 1000.0);
        Ok(count)
    }

    #[instrument(skip(self))]
    fn truncate_prefix(
        &self,
        first_index_kept: u64,
    ) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut state = self.state.write();
        let tree = state.tree()?.clone();
        if first_index_kept <= state.first_log_index {
            return Ok(());
        }

        let mut batch = Batch::default();
        remove_range(
            &tree,
            &mut batch,
            state.first_log_index,
            (first_index_kept - 1).min(state.last_log_index),
        )?;
        batch.insert(LOG_FIRST_INDEX_KEY, &safe_kv(first_index_kept)[..]);
        if let Err(e) = self.commit(&tree, batch) {
            state.poisoned = Some(format!("truncate_prefix failed: {e}"));
            return Err(e);
        }

        state.first_log_index = first_index_kept;
        if first_index_kept > state.last_log_index + 1 {
            state.last_log_index = first_index_kept - 1;
        }
        LOG_TRUNCATIONS.with_label_values(&[SLED_SCHEME, "prefix"]).inc();
        debug!(first_index_kept, "truncated prefix");
        Ok(())
    }

    #[instrument(skip(self))]
    fn truncate_suffix(
        &self,
        last_index_kept: u64,
    ) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut state = self.state.write();
        let tree = state.tree()?.clone();
        if !check_truncate_suffix(state.first_log_index, state.last_log_index, last_index_kept)? {
            return Ok(());
        }

        let mut batch = Batch::default();
        remove_range(&tree, &mut batch, last_index_kept + 1, state.last_log_index)?;
        if let Err(e) = self.commit(&tree, batch) {
            state.poisoned = Some(format!("truncate_suffix failed: {e}"));
            return Err(e);
        }

        state.last_log_index = last_index_kept;
        LOG_TRUNCATIONS.with_label_values(&[SLED_SCHEME, "suffix"]).inc();
        debug!(last_index_kept, "truncated suffix");
        Ok(())
    }

    #[instrument(skip(self))]
    fn reset(
        &self,
        next_log_index: u64,
    ) -> Result<()> {
        check_reset(next_log_index)?;
        let _guard = self.write_lock.lock();
        let mut state = self.state.write();
        let tree = state.tree()?.clone();

        let mut batch = Batch::default();
        remove_range(&tree, &mut batch, 0, u64::MAX)?;
        batch.insert(LOG_FIRST_INDEX_KEY, &safe_kv(next_log_index)[..]);
        if let Err(e) = self.commit(&tree, batch) {
            state.poisoned = Some(format!("reset failed: {e}"));
            return Err(e);
        }

        state.first_log_index = next_log_index;
        state.last_log_index = next_log_index - 1;
        LOG_TRUNCATIONS.with_label_values(&[SLED_SCHEME, "reset"]).inc();
        info!(next_log_index, "log reset");
        Ok(())
    }
}

impl Drop for SledLogStorage {
    fn drop(&mut self) {
        if let Some((db, _)) = &self.state.get_mut().db {
            if let Err(e) = db.flush() {
                error!("Failed to flush sled log on drop: {}", e);
            }
        }
    }
}
