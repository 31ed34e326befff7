//! Local-disk backends registered under `local://<dir>`.

mod file_stable_storage;
mod local_snapshot_storage;
mod segment;
mod segment_log_storage;

pub use file_stable_storage::*;
pub use local_snapshot_storage::*;
pub use segment_log_storage::*;

#[cfg(test)]
mod file_storage_test;
