//! Durable storage for a Raft-style replication engine.
//!
//! Three stores back a node: the replicated [`LogStorage`], the
//! [`StableStorage`] holding term and vote, and the [`SnapshotStorage`].
//! Backends are picked by URI scheme through the storage registry
//! ([`init_storage`], [`find_storage`], [`open_node_storage`]):
//!
//! - `memory://<name>`: volatile, for tests and embedding
//! - `local://<dir>`: segment files, a checksummed record, snapshot directories
//! - `sled://<dir>`: the sled embedded database, snapshots as local files

mod config;
mod constants;
mod errors;
mod metrics;
mod storage;
pub mod utils;

pub use self::config::*;
pub use constants::*;
pub use errors::*;
pub use metrics::*;
pub use storage::*;
pub use utils::uri::StorageUri;
pub use utils::*;


//-----------------------------------------------------------
// Autometrics
/// autometrics: https://docs.autometrics.dev/rust/adding-alerts-and-slos
use autometrics::objectives::Objective;
use autometrics::objectives::ObjectiveLatency;
use autometrics::objectives::ObjectivePercentile;
const API_SLO: Objective = Objective::new("storage_api")
    .success_rate(ObjectivePercentile::P99_9)
    .latency(ObjectiveLatency::Ms10, ObjectivePercentile::P99);
