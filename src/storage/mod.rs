mod adaptors;
mod configuration;
mod log_entry;
mod log_storage;
mod registry;
mod snapshot;
mod stable_storage;

#[doc(hidden)]
pub use adaptors::*;
pub use configuration::*;
pub use log_entry::*;
pub use log_storage::*;
pub use registry::*;
pub use snapshot::*;
pub use stable_storage::*;

#[cfg(test)]
mod configuration_test;
#[cfg(test)]
pub(crate) mod snapshot_storage_test;
