use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::debug;
use tracing::trace;

use crate::check_append_batch;
use crate::check_reset;
use crate::check_truncate_suffix;
use crate::metrics::LOG_APPENDED_ENTRIES;
use crate::metrics::LOG_APPEND_LATENCY_MS;
use crate::metrics::LOG_TRUNCATIONS;
use crate::ConfigurationManager;
use crate::LogEntry;
use crate::LogStorage;
use crate::Result;
use crate::MEMORY_SCHEME;

/// In-memory log; contents vanish with the instance.
#[derive(Debug)]
pub struct MemoryLogStorage {
    name: String,
    state: RwLock<MemoryLogState>,
}

#[derive(Debug)]
struct MemoryLogState {
    first_log_index: u64,
    entries: VecDeque<LogEntry>,
}

impl MemoryLogState {
    fn last_log_index(&self) -> u64 {
        self.first_log_index + self.entries.len() as u64 - 1
    }

    fn get(
        &self,
        index: u64,
    ) -> Option<&LogEntry> {
        if index < self.first_log_index {
            return None;
        }
        self.entries.get((index - self.first_log_index) as usize)
    }
}

impl MemoryLogStorage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(MemoryLogState {
                first_log_index: 1,
                entries: VecDeque::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl LogStorage for MemoryLogStorage {
    fn init(
        &self,
        configuration_manager: &mut dyn ConfigurationManager,
    ) -> Result<()> {
        let state = self.state.read();
        for entry in state.entries.iter().filter(|e| e.is_configuration()) {
            if let Some(configuration) = entry.decode_configuration()? {
                configuration_manager.apply(entry.index, configuration);
            }
        }
        debug!(name = %self.name, first = state.first_log_index, last = state.last_log_index(), "memory log ready");
        Ok(())
    }

    fn first_log_index(&self) -> u64 {
        self.state.read().first_log_index
    }

    fn last_log_index(&self) -> u64 {
        self.state.read().last_log_index()
    }

    fn get_entry(
        &self,
        index: u64,
    ) -> Result<Option<LogEntry>> {
        Ok(self.state.read().get(index).cloned())
    }

    fn get_term(
        &self,
        index: u64,
    ) -> Result<Option<u64>> {
        Ok(self.state.read().get(index).map(|e| e.term))
    }

    fn append_entries(
        &self,
        entries: Vec<LogEntry>,
    ) -> Result<usize> {
        let started = Instant::now();
        let mut state = self.state.write();
        check_append_batch(state.last_log_index(), state.entries.back().map(|e| e.term), &entries)?;

        let count = entries.len();
        trace!("append_entries len = {}", count);
        state.entries.extend(entries);

        LOG_APPENDED_ENTRIES.with_label_values(&[MEMORY_SCHEME]).inc_by(count as u64);
        LOG_APPEND_LATENCY_MS
            .with_label_values(&[MEMORY_SCHEME])
            .observe(started.elapsed().as_secs_f64() * 1000.0);
        Ok(count)
    }

    fn truncate_prefix(
        &self,
        first_index_kept: u64,
    ) -> Result<()> {
        let mut state = self.state.write();
        if first_index_kept <= state.first_log_index {
            return Ok(());
        }
        let dropped = ((first_index_kept - state.first_log_index) as usize).min(state.entries.len());
        state.entries.drain(..dropped);
        state.first_log_index = first_index_kept;

        LOG_TRUNCATIONS.with_label_values(&[MEMORY_SCHEME, "prefix"]).inc();
        debug!(name = %self.name, first_index_kept, "truncated prefix");
        Ok(())
    }

    fn truncate_suffix(
        &self,
        last_index_kept: u64,
    ) -> Result<()> {
        let mut state = self.state.write();
        if !check_truncate_suffix(state.first_log_index, state.last_log_index(), last_index_kept)? {
            return Ok(());
        }
        let kept = (last_index_kept + 1 - state.first_log_index) as usize;
        state.entries.truncate(kept);

        LOG_TRUNCATIONS.with_label_values(&[MEMORY_SCHEME, "suffix"]).inc();
        debug!(name = %self.name, last_index_kept, "truncated suffix");
        Ok(())
    }

    fn reset(
        &self,
        next_log_index: u64,
    ) -> Result<()> {
        check_reset(next_log_index)?;
        let mut state = self.state.write();
        state.entries.clear();
        state.first_log_index = next_log_index;

        LOG_TRUNCATIONS.with_label_values(&[MEMORY_SCHEME, "reset"]).inc();
        debug!(name = %self.name, next_log_index, "reset");
        Ok(())
    }
}
