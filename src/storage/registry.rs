//! Process-wide mapping from URI scheme to storage factories.
//!
//! The engine never names a backend type: it hands a locator such as
//! `local:///var/lib/raft/log` to [`find_storage`] and builds the store with
//! whatever was registered for the scheme.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Once;

use arc_swap::ArcSwap;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::StorageConfig;
use crate::constants::SLED_SNAPSHOT_DIR;
use crate::ConfigurationManager;
use crate::FileStableStorage;
use crate::LocalSnapshotStorage;
use crate::LogStorage;
use crate::MemoryLogStorage;
use crate::MemorySnapshotStorage;
use crate::MemoryStableStorage;
use crate::RegistryError;
use crate::Result;
use crate::SegmentLogStorage;
use crate::SledLogStorage;
use crate::SledOptions;
use crate::SledStableStorage;
use crate::SnapshotStorage;
use crate::StableStorage;
use crate::StorageUri;
use crate::LOCAL_SCHEME;
use crate::MEMORY_SCHEME;
use crate::SLED_SCHEME;

pub type LogStorageFactory = Arc<dyn Fn(&str) -> Result<Box<dyn LogStorage>> + Send + Sync>;
pub type StableStorageFactory = Arc<dyn Fn(&str) -> Result<Box<dyn StableStorage>> + Send + Sync>;
pub type SnapshotStorageFactory = Arc<dyn Fn(&str) -> Result<Box<dyn SnapshotStorage>> + Send + Sync>;

/// One backend's constructors. Each factory receives the full URI.
#[derive(Clone)]
pub struct Storage {
    name: String,
    log: LogStorageFactory,
    stable: StableStorageFactory,
    snapshot: SnapshotStorageFactory,
}

impl Storage {
    pub fn new<L, S, P>(
        name: impl Into<String>,
        log: L,
        stable: S,
        snapshot: P,
    ) -> Self
    where
        L: Fn(&str) -> Result<Box<dyn LogStorage>> + Send + Sync + 'static,
        S: Fn(&str) -> Result<Box<dyn StableStorage>> + Send + Sync + 'static,
        P: Fn(&str) -> Result<Box<dyn SnapshotStorage>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            log: Arc::new(log),
            stable: Arc::new(stable),
            snapshot: Arc::new(snapshot),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn create_log_storage(
        &self,
        uri: &str,
    ) -> Result<Box<dyn LogStorage>> {
        (self.log)(uri)
    }

    pub fn create_stable_storage(
        &self,
        uri: &str,
    ) -> Result<Box<dyn StableStorage>> {
        (self.stable)(uri)
    }

    pub fn create_snapshot_storage(
        &self,
        uri: &str,
    ) -> Result<Box<dyn SnapshotStorage>> {
        (self.snapshot)(uri)
    }

    /// `memory://<name>`
    pub fn memory() -> Self {
        Self::new(
            MEMORY_SCHEME,
            |uri| Ok(Box::new(MemoryLogStorage::new(StorageUri::parse(uri)?.path()))),
            |uri| Ok(Box::new(MemoryStableStorage::new(StorageUri::parse(uri)?.path()))),
            |uri| Ok(Box::new(MemorySnapshotStorage::new(StorageUri::parse(uri)?.path()))),
        )
    }

    /// `local://<dir>`: segment files, a record file, snapshot directories.
    pub fn local() -> Self {
        Self::new(
            LOCAL_SCHEME,
            |uri| Ok(Box::new(SegmentLogStorage::from_uri(&StorageUri::parse(uri)?)?)),
            |uri| Ok(Box::new(FileStableStorage::from_uri(&StorageUri::parse(uri)?)?)),
            |uri| Ok(Box::new(LocalSnapshotStorage::from_uri(&StorageUri::parse(uri)?)?)),
        )
    }

    /// `sled://<dir>`: log and stable state in sled, snapshots as local files.
    pub fn sled() -> Self {
        Self::new(
            SLED_SCHEME,
            |uri| Ok(Box::new(SledLogStorage::from_uri(&StorageUri::parse(uri)?)?)),
            |uri| Ok(Box::new(SledStableStorage::from_uri(&StorageUri::parse(uri)?)?)),
            |uri| {
                let uri = StorageUri::parse(uri)?;
                let options = SledOptions::from_uri(&uri)?;
                Ok(Box::new(LocalSnapshotStorage::new(
                    uri.dir()?.join(SLED_SNAPSHOT_DIR),
                    options.sync,
                )))
            },
        )
    }
}

impl fmt::Debug for Storage {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Storage").field("name", &self.name).finish_non_exhaustive()
    }
}

/// The three initialized stores a node runs on.
pub struct NodeStorage {
    pub log: Box<dyn LogStorage>,
    pub stable: Box<dyn StableStorage>,
    pub snapshot: Box<dyn SnapshotStorage>,
}

/// Copy-on-write scheme map: lookups load the current map without locking,
/// registrations publish a new one.
pub struct StorageRegistry {
    storages: ArcSwap<HashMap<String, Arc<Storage>>>,
    write_lock: Mutex<()>,
}

impl Default for StorageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self {
            storages: ArcSwap::from_pointee(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Registry pre-loaded with `memory`, `local` and `sled`.
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.register_builtin();
        registry
    }

    /// Register the built-in backends, keeping any scheme already taken.
    pub fn register_builtin(&self) {
        for storage in [Storage::memory(), Storage::local(), Storage::sled()] {
            let scheme = storage.name().to_string();
            if let Err(e) = self.register(&scheme, storage) {
                warn!("built-in storage {:?} not registered: {}", scheme, e);
            }
        }
    }

    pub fn register(
        &self,
        scheme: &str,
        storage: Storage,
    ) -> Result<()> {
        let scheme = normalize_scheme(scheme)?;
        let _guard = self.write_lock.lock();

        let current = self.storages.load();
        if current.contains_key(&scheme) {
            return Err(RegistryError::AlreadyRegistered(scheme).into());
        }
        let mut next = HashMap::clone(&current);
        next.insert(scheme.clone(), Arc::new(storage));
        self.storages.store(Arc::new(next));

        info!(scheme = %scheme, "registered storage");
        Ok(())
    }

    /// Registration for the scheme of `uri`, if any.
    pub fn find(
        &self,
        uri: &str,
    ) -> Option<Arc<Storage>> {
        let scheme = StorageUri::scheme_of(uri)?.to_ascii_lowercase();
        self.storages.load().get(&scheme).cloned()
    }

    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.storages.load().keys().cloned().collect();
        schemes.sort();
        schemes
    }

    /// Resolve, build and initialize the log, stable and snapshot stores.
    pub fn open_node_storage(
        &self,
        config: &StorageConfig,
        configuration_manager: &mut dyn ConfigurationManager,
    ) -> Result<NodeStorage> {
        config.validate()?;

        let log = self.resolve(&config.log_uri)?.create_log_storage(&config.log_uri)?;
        let stable = self
            .resolve(&config.stable_uri)?
            .create_stable_storage(&config.stable_uri)?;
        let snapshot = self
            .resolve(&config.snapshot_uri)?
            .create_snapshot_storage(&config.snapshot_uri)?;

        stable.init()?;
        log.init(configuration_manager)?;
        snapshot.init()?;
        debug!(
            log = %config.log_uri,
            stable = %config.stable_uri,
            snapshot = %config.snapshot_uri,
            "node storage opened"
        );

        Ok(NodeStorage { log, stable, snapshot })
    }

    fn resolve(
        &self,
        uri: &str,
    ) -> Result<Arc<Storage>> {
        self.find(uri).ok_or_else(|| {
            RegistryError::SchemeNotFound(StorageUri::scheme_of(uri).unwrap_or(uri).to_string()).into()
        })
    }
}

fn normalize_scheme(scheme: &str) -> Result<String> {
    let probe = format!("{scheme}://");
    StorageUri::parse(&probe)?;
    Ok(scheme.to_ascii_lowercase())
}

lazy_static! {
    static ref GLOBAL_REGISTRY: StorageRegistry = StorageRegistry::new();
}

static BUILTIN_INIT: Once = Once::new();

/// Register the built-in backends in the process-wide registry. Idempotent.
pub fn init_storage() {
    BUILTIN_INIT.call_once(|| GLOBAL_REGISTRY.register_builtin());
}

pub fn register_storage(
    scheme: &str,
    storage: Storage,
) -> Result<()> {
    GLOBAL_REGISTRY.register(scheme, storage)
}

pub fn find_storage(uri: &str) -> Option<Arc<Storage>> {
    GLOBAL_REGISTRY.find(uri)
}

/// [`StorageRegistry::open_node_storage`] on the process-wide registry,
/// after [`init_storage`].
pub fn open_node_storage(
    config: &StorageConfig,
    configuration_manager: &mut dyn ConfigurationManager,
) -> Result<NodeStorage> {
    init_storage();
    GLOBAL_REGISTRY.open_node_storage(config, configuration_manager)
}
