use super::ConfigurationManager;
use super::LogEntry;
use crate::Result;
use crate::StorageError;

/// Durable, append-only, indexed replicated log.
///
/// An empty store reports `first_log_index() == 1` and
/// `last_log_index() == 0`. The retained range always satisfies
/// `first_log_index <= last_log_index + 1`.
///
/// Mutations are expected from one caller at a time; implementations still
/// serialize them internally and let readers proceed concurrently.
pub trait LogStorage: Send + Sync + 'static {
    /// Open or validate the persisted log and replay every configuration
    /// entry of the retained range into `configuration_manager`, ascending.
    fn init(
        &self,
        configuration_manager: &mut dyn ConfigurationManager,
    ) -> Result<()>;

    fn first_log_index(&self) -> u64;

    fn last_log_index(&self) -> u64;

    /// `None` outside `[first_log_index, last_log_index]`.
    fn get_entry(
        &self,
        index: u64,
    ) -> Result<Option<LogEntry>>;

    /// Term of the entry at `index`; `None` outside the retained range.
    fn get_term(
        &self,
        index: u64,
    ) -> Result<Option<u64>>;

    fn append_entry(
        &self,
        entry: LogEntry,
    ) -> Result<()> {
        self.append_entries(vec![entry]).map(|_| ())
    }

    /// Append right after `last_log_index`.
    ///
    /// Returns how many entries became durable. A count below
    /// `entries.len()` means the batch failed partway and the store now ends
    /// at exactly that many new entries. A failure before any entry was
    /// durable is returned as an error.
    fn append_entries(
        &self,
        entries: Vec<LogEntry>,
    ) -> Result<usize>;

    /// Discard every index below `first_index_kept`.
    fn truncate_prefix(
        &self,
        first_index_kept: u64,
    ) -> Result<()>;

    /// Discard every index above `last_index_kept`.
    fn truncate_suffix(
        &self,
        last_index_kept: u64,
    ) -> Result<()>;

    /// Drop everything; the log restarts empty at `next_log_index`.
    fn reset(
        &self,
        next_log_index: u64,
    ) -> Result<()>;
}

/// Contiguity and term-order checks shared by every backend.
pub(crate) fn check_append_batch(
    last_log_index: u64,
    last_term: Option<u64>,
    entries: &[LogEntry],
) -> Result<()> {
    let mut expected_index = last_log_index + 1;
    let mut min_term = last_term.unwrap_or(0);
    for entry in entries {
        if entry.index != expected_index {
            return Err(StorageError::InvalidArgument(format!(
                "non-contiguous append: expected index {expected_index}, got {}",
                entry.index
            ))
            .into());
        }
        if entry.term < min_term {
            return Err(StorageError::InvalidArgument(format!(
                "term went backwards at index {}: {} < {min_term}",
                entry.index, entry.term
            ))
            .into());
        }
        expected_index += 1;
        min_term = entry.term;
    }
    Ok(())
}

/// `Ok(false)` when the truncation is a no-op.
pub(crate) fn check_truncate_suffix(
    first_log_index: u64,
    last_log_index: u64,
    last_index_kept: u64,
) -> Result<bool> {
    if last_index_kept >= last_log_index {
        return Ok(false);
    }
    if last_index_kept + 1 < first_log_index {
        return Err(StorageError::InvalidArgument(format!(
            "truncate_suffix({last_index_kept}) below first_log_index {first_log_index}"
        ))
        .into());
    }
    Ok(true)
}

pub(crate) fn check_reset(next_log_index: u64) -> Result<()> {
    if next_log_index == 0 {
        return Err(StorageError::InvalidArgument("reset(0): log indexes start at 1".to_string()).into());
    }
    Ok(())
}
