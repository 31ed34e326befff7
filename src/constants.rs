// -
// Registry schemes

pub const MEMORY_SCHEME: &str = "memory";
pub const LOCAL_SCHEME: &str = "local";
pub const SLED_SCHEME: &str = "sled";

// -
// Segment log layout

/// Metadata file holding first_log_index and any pending intent
pub(crate) const LOG_META_FILE: &str = "log_meta";
pub(crate) const SEGMENT_CLOSED_PREFIX: &str = "log_";
pub(crate) const SEGMENT_OPEN_PREFIX: &str = "log_inprogress_";
/// `[len: u32][crc32: u32][header crc32: u32]`
pub(crate) const RECORD_HEADER_SIZE: u64 = 12;
pub(crate) const DEFAULT_SEGMENT_SIZE: u64 = 8 * 1024 * 1024;

// -
// Stable storage layout

pub(crate) const HARD_STATE_FILE: &str = "stable_meta";

/// Sled keys
pub(crate) const HARD_STATE_KEY: &[u8] = b"_raft_hard_state";
pub(crate) const LOG_FIRST_INDEX_KEY: &[u8] = b"m:first_log_index";
pub(crate) const LOG_ENTRY_KEY_PREFIX: u8 = b'e';
pub(crate) const SLED_LOG_TREE: &str = "_raft_log";
pub(crate) const SLED_STABLE_TREE: &str = "_raft_stable";
pub(crate) const DEFAULT_SLED_CACHE_CAPACITY: u64 = 64 * 1024 * 1024;
/// Sub-directories of a `sled://<dir>` root
pub(crate) const SLED_LOG_DB: &str = "raft_log";
pub(crate) const SLED_STABLE_DB: &str = "state_storage";
pub(crate) const SLED_SNAPSHOT_DIR: &str = "snapshot";

// -
// Snapshot layout

pub(crate) const SNAPSHOT_DIR_PREFIX: &str = "snapshot_";
pub(crate) const SNAPSHOT_TEMP_DIR: &str = "temp";
pub(crate) const SNAPSHOT_META_FILE: &str = "__raft_snapshot_meta";

/// Suffix of the scratch file used for atomic replace
pub(crate) const TEMP_FILE_SUFFIX: &str = ".tmp";
