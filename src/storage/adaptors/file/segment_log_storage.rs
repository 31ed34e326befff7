//! Local-disk log made of segment files plus a `log_meta` record.
//!
//! `log_meta` holds `first_log_index` and, while a suffix truncation or a
//! reset is in progress, the intent of that operation. It is always replaced
//! atomically, so after a crash `init` either sees the intent and finishes
//! it or sees no trace of it.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use autometrics::autometrics;
use parking_lot::Mutex;
use parking_lot::RwLock;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use super::segment::EntryLocation;
use super::segment::Segment;
use super::segment::SegmentName;
use super::segment::Tail;
use crate::check_append_batch;
use crate::check_reset;
use crate::check_truncate_suffix;
use crate::constants::DEFAULT_SEGMENT_SIZE;
use crate::constants::LOG_META_FILE;
use crate::constants::TEMP_FILE_SUFFIX;
use crate::metrics::LOG_APPENDED_ENTRIES;
use crate::metrics::LOG_APPEND_FAILURES;
use crate::metrics::LOG_APPEND_LATENCY_MS;
use crate::metrics::LOG_TRUNCATIONS;
use crate::utils::file_io::create_dir_if_not_exist;
use crate::utils::file_io::encode_checksummed;
use crate::utils::file_io::fsync_dir;
use crate::utils::file_io::read_checksummed_file;
use crate::utils::file_io::remove_file_if_exists;
use crate::utils::file_io::write_atomic;
use crate::ConfigurationManager;
use crate::Error;
use crate::LogEntry;
use crate::LogStorage;
use crate::Result;
use crate::StorageError;
use crate::StorageUri;
use crate::API_SLO;
use crate::LOCAL_SCHEME;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentLogOptions {
    /// fsync every append batch and every metadata change
    pub sync: bool,
    /// Size at which the open segment is sealed and a new one started
    pub segment_size: u64,
}

impl Default for SegmentLogOptions {
    fn default() -> Self {
        Self {
            sync: true,
            segment_size: DEFAULT_SEGMENT_SIZE,
        }
    }
}

impl SegmentLogOptions {
    /// `local://<dir>?sync=<bool>&segment_size=<bytes>`
    pub fn from_uri(uri: &StorageUri) -> Result<Self> {
        let options = Self {
            sync: uri.sync()?,
            segment_size: uri.param_or("segment_size", DEFAULT_SEGMENT_SIZE)?,
        };
        if options.segment_size == 0 {
            return Err(StorageError::InvalidArgument(format!("{uri}: segment_size must be positive")).into());
        }
        Ok(options)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(super) enum PendingOp {
    TruncateSuffix(u64),
    Reset,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(super) struct LogMeta {
    pub(super) first_log_index: u64,
    pub(super) pending: Option<PendingOp>,
}

impl Default for LogMeta {
    fn default() -> Self {
        Self {
            first_log_index: 1,
            pending: None,
        }
    }
}

#[derive(Debug)]
struct SegmentLogState {
    initialized: bool,
    /// Set when a failed mutation left disk and memory out of step
    poisoned: Option<String>,
    first_log_index: u64,
    last_log_index: u64,
    /// Keyed by first index; at most the last one is open
    segments: BTreeMap<u64, Segment>,
}

impl SegmentLogState {
    fn new() -> Self {
        Self {
            initialized: false,
            poisoned: None,
            first_log_index: 1,
            last_log_index: 0,
            segments: BTreeMap::new(),
        }
    }

    fn check_writable(&self) -> Result<()> {
        if let Some(reason) = &self.poisoned {
            return Err(Error::Fatal(format!("log storage unusable until restart: {reason}")));
        }
        if !self.initialized {
            return Err(StorageError::InvalidArgument("log storage used before init".to_string()).into());
        }
        Ok(())
    }

    fn in_range(
        &self,
        index: u64,
    ) -> bool {
        index >= self.first_log_index && index <= self.last_log_index
    }

    fn segment_for(
        &self,
        index: u64,
    ) -> Option<&Segment> {
        self.segments
            .range(..=index)
            .next_back()
            .map(|(_, s)| s)
            .filter(|s| s.contains(index))
    }

    fn term(
        &self,
        index: u64,
    ) -> Option<u64> {
        if !self.in_range(index) {
            return None;
        }
        self.segment_for(index).and_then(|s| s.term(index))
    }
}

/// Segment-file log registered under `local://`.
#[derive(Debug)]
pub struct SegmentLogStorage {
    dir: PathBuf,
    options: SegmentLogOptions,
    state: RwLock<SegmentLogState>,
    /// Serializes mutations; readers only take `state`
    write_lock: Mutex<()>,
    #[cfg(test)]
    pub(super) faults: Mutex<WriteFaults>,
}

/// Disk failures armed by tests to reach the error paths of an append.
#[cfg(test)]
#[derive(Debug, Default)]
pub(super) struct WriteFaults {
    /// Chunk writes that still succeed before one fails halfway
    pub(super) fail_write_after: Option<usize>,
    pub(super) fail_rollback: bool,
}

impl SegmentLogStorage {
    pub fn new(
        dir: impl Into<PathBuf>,
        options: SegmentLogOptions,
    ) -> Self {
        Self {
            dir: dir.into(),
            options,
            state: RwLock::new(SegmentLogState::new()),
            write_lock: Mutex::new(()),
            #[cfg(test)]
            faults: Mutex::new(WriteFaults::default()),
        }
    }

    pub fn from_uri(uri: &StorageUri) -> Result<Self> {
        Ok(Self::new(uri.dir()?, SegmentLogOptions::from_uri(uri)?))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn meta_path(&self) -> PathBuf {
        self.dir.join(LOG_META_FILE)
    }

    fn read_meta(&self) -> Result<LogMeta> {
        let path = self.meta_path();
        let Some(bytes) = read_checksummed_file(&path)? else {
            return Ok(LogMeta::default());
        };
        let meta: LogMeta = bincode::deserialize(&bytes).map_err(|e| {
            StorageError::corruption(path.display().to_string(), format!("undecodable log meta: {e}"))
        })?;
        if meta.first_log_index == 0 {
            return Err(StorageError::corruption(path.display().to_string(), "first_log_index is 0").into());
        }
        Ok(meta)
    }

    fn write_meta(
        &self,
        meta: LogMeta,
    ) -> Result<()> {
        let bytes = bincode::serialize(&meta)?;
        write_atomic(&self.meta_path(), &encode_checksummed(&bytes), self.options.sync)
    }

    /// Segment names found in the directory, sorted by first index.
    fn list_segments(&self) -> Result<Vec<(SegmentName, PathBuf)>> {
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(|e| StorageError::at_path(&self.dir, e))? {
            let path = entry.map_err(|e| StorageError::at_path(&self.dir, e))?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            if name.ends_with(TEMP_FILE_SUFFIX) {
                warn!(?path, "removing leftover temp file");
                remove_file_if_exists(&path)?;
                continue;
            }
            match SegmentName::parse(&name) {
                Some(segment) => found.push((segment, path)),
                None if name == LOG_META_FILE => {}
                None => warn!(?path, "ignoring unknown file in log directory"),
            }
        }
        found.sort_by_key(|(name, _)| name.first());
        Ok(found)
    }

    /// Rebuild in-memory state from disk, finishing any pending intent.
    fn recover(&self) -> Result<(SegmentLogState, Vec<LogEntry>)> {
        let meta = self.read_meta()?;
        let names = self.list_segments()?;
        let mut state = SegmentLogState::new();
        state.first_log_index = meta.first_log_index;

        if meta.pending == Some(PendingOp::Reset) {
            info!(dir = ?self.dir, first = meta.first_log_index, "finishing interrupted reset");
            for (_, path) in &names {
                remove_file_if_exists(path)?;
            }
            fsync_dir(&self.dir)?;
            self.write_meta(LogMeta {
                pending: None,
                ..meta
            })?;
            state.last_log_index = meta.first_log_index - 1;
            return Ok((state, Vec::new()));
        }

        let mut configurations = Vec::new();
        let mut stale = Vec::new();
        let total = names.len();
        let open_count = names.iter().filter(|(n, _)| matches!(n, SegmentName::Open { .. })).count();
        for (position, (name, path)) in names.into_iter().enumerate() {
            let location = path.display().to_string();
            if name.first() == 0 {
                return Err(StorageError::corruption(location, "segment starts at index 0").into());
            }
            if matches!(name, SegmentName::Open { .. }) && (open_count > 1 || position + 1 != total) {
                return Err(StorageError::corruption(location, "open segment is not the last segment").into());
            }
            // Left behind by a prefix truncation whose cleanup did not finish.
            if let SegmentName::Closed { last, .. } = name {
                if last < meta.first_log_index {
                    stale.push(path);
                    continue;
                }
            }

            let mut scanned = Segment::scan(path, name)?;
            match scanned.tail {
                Tail::Clean => {}
                Tail::Torn { valid_len, reason } if scanned.segment.is_open => {
                    warn!(%location, valid_len, %reason, "repairing torn tail of open segment");
                    scanned.segment.set_len(valid_len, true)?;
                }
                Tail::Torn { valid_len, reason } => {
                    return Err(StorageError::corruption(location, format!("{reason} at offset {valid_len}")).into());
                }
                Tail::Corrupt { offset, reason } => {
                    return Err(StorageError::corruption(location, format!("{reason} at offset {offset}")).into());
                }
            }
            configurations.append(&mut scanned.configurations);
            state.segments.insert(scanned.segment.first_index, scanned.segment);
        }

        if let Some(PendingOp::TruncateSuffix(last_index_kept)) = meta.pending {
            info!(dir = ?self.dir, last_index_kept, "finishing interrupted suffix truncation");
            truncate_segments_after(&mut state, &self.dir, last_index_kept, self.options.sync)?;
            for segment in state.segments.values_mut() {
                segment.sync_name(&self.dir)?;
            }
            fsync_dir(&self.dir)?;
            self.write_meta(LogMeta {
                pending: None,
                ..meta
            })?;
        }

        self.drop_obsolete_segments(&mut state, meta.first_log_index);
        self.remove_segment_files(stale);
        self.validate_segments(&state)?;

        state.last_log_index = match state.segments.values().next_back() {
            Some(last) => last.last_index(),
            None => meta.first_log_index - 1,
        };
        let (first, last) = (state.first_log_index, state.last_log_index);
        configurations.retain(|e| e.index >= first && e.index <= last);
        Ok((state, configurations))
    }

    fn validate_segments(
        &self,
        state: &SegmentLogState,
    ) -> Result<()> {
        let mut previous: Option<&Segment> = None;
        for segment in state.segments.values() {
            let expected = self.dir.join(segment.expected_name().file_name());
            if segment.path != expected {
                return Err(StorageError::corruption(
                    segment.path.display().to_string(),
                    format!("segment holds entries {}..={}", segment.first_index, segment.last_index()),
                )
                .into());
            }
            if let Some(previous) = previous {
                if segment.first_index != previous.last_index() + 1 {
                    return Err(StorageError::corruption(
                        segment.path.display().to_string(),
                        format!("gap after segment ending at {}", previous.last_index()),
                    )
                    .into());
                }
            }
            previous = Some(segment);
        }

        let first_log_index = state.first_log_index;
        let retained = state.segments.values().find(|s| s.last_index() >= first_log_index);
        if let Some(head) = retained {
            if head.first_index > first_log_index {
                return Err(StorageError::corruption(
                    head.path.display().to_string(),
                    format!("entries {first_log_index}..{} are missing", head.first_index),
                )
                .into());
            }
        }
        Ok(())
    }

    /// Delete segments entirely below `first_log_index`; failures only delay
    /// the cleanup to the next `init`.
    fn drop_obsolete_segments(
        &self,
        state: &mut SegmentLogState,
        first_log_index: u64,
    ) {
        let obsolete: Vec<u64> = state
            .segments
            .values()
            .filter(|s| s.last_index() < first_log_index)
            .map(|s| s.first_index)
            .collect();
        let paths = obsolete
            .into_iter()
            .filter_map(|first| state.segments.remove(&first))
            .map(|segment| segment.path)
            .collect();
        self.remove_segment_files(paths);
    }

    fn remove_segment_files(
        &self,
        paths: Vec<PathBuf>,
    ) {
        if paths.is_empty() {
            return;
        }
        for path in paths {
            debug!(?path, "removing obsolete segment");
            if let Err(e) = remove_file_if_exists(&path) {
                warn!(?path, "failed to remove obsolete segment: {:?}", e);
            }
        }
        if let Err(e) = fsync_dir(&self.dir) {
            warn!(dir = ?self.dir, "fsync after segment cleanup failed: {:?}", e);
        }
    }

    /// Open segment with room for more records, sealing a full one and
    /// starting a new one as needed. Returns `(first_index, file, offset)`.
    fn writable_segment(&self) -> Result<(u64, Arc<fs::File>, u64)> {
        {
            let state = self.state.read();
            if let Some(segment) = state.segments.values().next_back() {
                if segment.is_open && segment.bytes < self.options.segment_size {
                    return Ok((segment.first_index, segment.file.clone(), segment.bytes));
                }
            }
        }

        let mut state = self.state.write();
        if let Some(segment) = state.segments.values_mut().next_back() {
            if segment.is_open {
                segment.close(&self.dir)?;
                debug!(path = ?segment.path, "sealed full segment");
            }
        }
        let first_index = state.last_log_index + 1;
        let segment = Segment::create_open(&self.dir, first_index)?;
        let handle = (segment.first_index, segment.file.clone(), 0);
        state.segments.insert(first_index, segment);
        Ok(handle)
    }

    /// Write as many of `entries` as fit the open segment. Returns how many
    /// were made durable.
    fn append_chunk(
        &self,
        entries: &[LogEntry],
    ) -> Result<usize> {
        let (segment_first, file, base_offset) = self.writable_segment()?;

        let mut buf = Vec::new();
        let mut locations = Vec::new();
        for entry in entries {
            if !locations.is_empty() && base_offset + buf.len() as u64 >= self.options.segment_size {
                break;
            }
            let payload = entry.encode()?;
            locations.push(EntryLocation {
                offset: base_offset + buf.len() as u64,
                len: payload.len() as u32,
                term: entry.term,
            });
            buf.extend_from_slice(&encode_checksummed(&payload));
        }

        let written = self.write_chunk(&file, &buf);

        let mut state = self.state.write();
        let segment = state.segments.get_mut(&segment_first).ok_or_else(|| {
            Error::Fatal(format!("open segment {segment_first} vanished during append"))
        })?;
        if let Err(e) = written {
            let path = segment.path.clone();
            if let Err(rollback) = self.roll_back(segment, base_offset) {
                error!(?path, "could not roll back failed append: {:?}", rollback);
                state.poisoned = Some(format!("append rollback failed: {rollback}"));
            }
            return Err(StorageError::at_path(path, e).into());
        }

        let count = locations.len();
        segment.locations.extend(locations);
        segment.bytes = base_offset + buf.len() as u64;
        state.last_log_index += count as u64;
        Ok(count)
    }

    fn write_chunk(
        &self,
        mut file: &fs::File,
        buf: &[u8],
    ) -> std::io::Result<()> {
        #[cfg(test)]
        self.injected_write_failure(file, buf)?;
        file.write_all(buf)?;
        if self.options.sync {
            file.sync_data()?;
        }
        Ok(())
    }

    fn roll_back(
        &self,
        segment: &mut Segment,
        len: u64,
    ) -> Result<()> {
        #[cfg(test)]
        if self.faults.lock().fail_rollback {
            return Err(Error::Fatal("injected rollback failure".to_string()));
        }
        segment.set_len(len, self.options.sync)
    }

    /// Leaves half of `buf` on disk when the armed write fails, like a
    /// device that errors out mid-write.
    #[cfg(test)]
    fn injected_write_failure(
        &self,
        mut file: &fs::File,
        buf: &[u8],
    ) -> std::io::Result<()> {
        let mut faults = self.faults.lock();
        match faults.fail_write_after.as_mut() {
            Some(0) => {
                file.write_all(&buf[..buf.len() / 2])?;
                Err(std::io::Error::new(std::io::ErrorKind::Other, "injected write failure"))
            }
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn poison(
        &self,
        reason: String,
    ) {
        error!(dir = ?self.dir, %reason, "log storage poisoned");
        self.state.write().poisoned = Some(reason);
    }
}

/// Drop every entry above `last_index_kept`, deleting whole segments from
/// the highest one down and cutting the segment that holds the new tail.
fn truncate_segments_after(
    state: &mut SegmentLogState,
    dir: &Path,
    last_index_kept: u64,
    sync: bool,
) -> Result<()> {
    let doomed: Vec<u64> = state.segments.range(last_index_kept + 1..).map(|(first, _)| *first).collect();
    for first in doomed.into_iter().rev() {
        if let Some(segment) = state.segments.remove(&first) {
            debug!(path = ?segment.path, "removing truncated segment");
            remove_file_if_exists(&segment.path)?;
        }
    }
    if let Some(segment) = state.segments.values_mut().next_back() {
        if segment.last_index() > last_index_kept {
            segment.truncate_after(dir, last_index_kept, sync)?;
        }
    }
    fsync_dir(dir)?;
    state.last_log_index = last_index_kept.max(state.first_log_index - 1);
    Ok(())
}

impl LogStorage for SegmentLogStorage {
    #[instrument(skip(self, configuration_manager), fields(dir = ?self.dir))]
    fn init(
        &self,
        configuration_manager: &mut dyn ConfigurationManager,
    ) -> Result<()> {
        let _guard = self.write_lock.lock();
        create_dir_if_not_exist(&self.dir)?;

        let (mut recovered, configurations) = self.recover()?;
        for entry in configurations {
            if let Some(configuration) = entry.decode_configuration()? {
                configuration_manager.apply(entry.index, configuration);
            }
        }
        recovered.initialized = true;

        info!(
            first = recovered.first_log_index,
            last = recovered.last_log_index,
            segments = recovered.segments.len(),
            "segment log ready"
        );
        *self.state.write() = recovered;
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
        let state = self.state.read();
        if !state.in_range(index) {
            return Ok(None);
        }
        let segment = state.segment_for(index).ok_or_else(|| {
            StorageError::corruption(self.dir.display().to_string(), format!("no segment holds index {index}"))
        })?;
        segment.read_entry(index).map(Some)
    }

    fn get_term(
        &self,
        index: u64,
    ) -> Result<Option<u64>> {
        Ok(self.state.read().term(index))
    }

    #[autometrics(objective = API_SLO)]
    #[instrument(skip(self, entries), fields(count = entries.len()))]
    fn append_entries(
        &self,
        entries: Vec<LogEntry>,
    ) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let started = Instant::now();
        {
            let state = self.state.read();
            state.check_writable()?;
            check_append_batch(state.last_log_index, state.term(state.last_log_index), &entries)?;
        }

        let mut durable = 0;
        while durable < entries.len() {
            match self.append_chunk(&entries[durable..]) {
                Ok(count) => durable += count,
                Err(e) if durable > 0 => {
                    error!(durable, total = entries.len(), "append stopped partway: {:?}", e);
                    LOG_APPEND_FAILURES.with_label_values(&[LOCAL_SCHEME]).inc();
                    break;
                }
                Err(e) => {
                    LOG_APPEND_FAILURES.with_label_values(&[LOCAL_SCHEME]).inc();
                    return Err(e);
                }
            }
        }

        LOG_APPENDED_ENTRIES.with_label_values(&[LOCAL_SCHEME]).inc_by(durable as u64);
        LOG_APPEND_LATENCY_MS
            .with_label_values(&[LOCAL_SCHEME])
            .observe(started.elapsed().as_secs_f64() * 1000.0);
        Ok(durable)
    }

    #[instrument(skip(self))]
    fn truncate_prefix(
        &self,
        first_index_kept: u64,
    ) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut state = self.state.write();
        state.check_writable()?;
        if first_index_kept <= state.first_log_index {
            return Ok(());
        }

        self.write_meta(LogMeta {
            first_log_index: first_index_kept,
            pending: None,
        })?;
        state.first_log_index = first_index_kept;
        if first_index_kept > state.last_log_index + 1 {
            state.last_log_index = first_index_kept - 1;
        }
        self.drop_obsolete_segments(&mut state, first_index_kept);

        LOG_TRUNCATIONS.with_label_values(&[LOCAL_SCHEME, "prefix"]).inc();
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
        state.check_writable()?;
        if !check_truncate_suffix(state.first_log_index, state.last_log_index, last_index_kept)? {
            return Ok(());
        }

        let meta = LogMeta {
            first_log_index: state.first_log_index,
            pending: Some(PendingOp::TruncateSuffix(last_index_kept)),
        };
        self.write_meta(meta)?;
        let applied = truncate_segments_after(&mut state, &self.dir, last_index_kept, self.options.sync)
            .and_then(|_| self.write_meta(LogMeta { pending: None, ..meta }));
        if let Err(e) = applied {
            drop(state);
            self.poison(format!("truncate_suffix({last_index_kept}) failed: {e}"));
            return Err(e);
        }

        LOG_TRUNCATIONS.with_label_values(&[LOCAL_SCHEME, "suffix"]).inc();
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
        state.check_writable()?;

        let meta = LogMeta {
            first_log_index: next_log_index,
            pending: Some(PendingOp::Reset),
        };
        self.write_meta(meta)?;

        let segments = std::mem::take(&mut state.segments);
        state.first_log_index = next_log_index;
        state.last_log_index = next_log_index - 1;
        let applied = segments
            .values()
            .rev()
            .try_for_each(|s| remove_file_if_exists(&s.path))
            .and_then(|_| fsync_dir(&self.dir))
            .and_then(|_| self.write_meta(LogMeta { pending: None, ..meta }));
        if let Err(e) = applied {
            drop(state);
            self.poison(format!("reset({next_log_index}) failed: {e}"));
            return Err(e);
        }

        LOG_TRUNCATIONS.with_label_values(&[LOCAL_SCHEME, "reset"]).inc();
        info!(next_log_index, "log reset");
        Ok(())
    }
}

impl Drop for SegmentLogStorage {
    fn drop(&mut self) {
        if self.options.sync {
            return;
        }
        let state = self.state.read();
        if let Some(segment) = state.segments.values().next_back().filter(|s| s.is_open) {
            if let Err(e) = segment.file.sync_all() {
                error!(path = ?segment.path, "flush on drop failed: {:?}", e);
            }
        }
    }
}
