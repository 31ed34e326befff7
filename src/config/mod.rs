//! Storage configuration.
//!
//! Sources are merged with increasing priority:
//! 1. Default values (hardcoded)
//! 2. Optional TOML file
//! 3. Environment variables prefixed `RAFT_STORAGE__`

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;
use crate::StorageUri;

pub const CONFIG_ENV_PREFIX: &str = "RAFT_STORAGE";

/// Locators of the three stores a node needs. Each URI selects a backend
/// by scheme; the rest is interpreted by that backend.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    #[serde(default = "default_log_uri")]
    pub log_uri: String,

    #[serde(default = "default_stable_uri")]
    pub stable_uri: String,

    #[serde(default = "default_snapshot_uri")]
    pub snapshot_uri: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            log_uri: default_log_uri(),
            stable_uri: default_stable_uri(),
            snapshot_uri: default_snapshot_uri(),
        }
    }
}

impl StorageConfig {
    /// Load configuration, optionally overlaying the TOML file at `path`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(CONFIG_ENV_PREFIX)
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Every locator must at least parse.
    pub fn validate(&self) -> Result<()> {
        for (field, uri) in [
            ("log_uri", &self.log_uri),
            ("stable_uri", &self.stable_uri),
            ("snapshot_uri", &self.snapshot_uri),
        ] {
            if let Err(e) = StorageUri::parse(uri) {
                return Err(Error::Config(ConfigError::Message(format!("{field}: {e}"))));
            }
        }
        Ok(())
    }
}

fn default_log_uri() -> String {
    "local://./db/raft_log".to_string()
}
fn default_stable_uri() -> String {
    "local://./db/raft_meta".to_string()
}
fn default_snapshot_uri() -> String {
    "local://./db/snapshot".to_string()
}
