//! Volatile backends registered under `memory://<name>`.

mod mem_log_storage;
mod mem_snapshot_storage;
mod mem_stable_storage;

pub use mem_log_storage::*;
pub use mem_snapshot_storage::*;
pub use mem_stable_storage::*;
