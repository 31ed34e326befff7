//! Storage Layer Error Hierarchy
//!
//! Defines the error types surfaced by the log, stable and snapshot stores
//! and by the storage registry, categorized by the layer that produced them.

use std::path::PathBuf;

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Persistence failures (media, integrity, arguments)
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Backend registration and lookup failures
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Storage configuration validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Disk I/O failures during log/stable/snapshot operations
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// I/O failure bound to a concrete file or directory
    #[error("I/O error at path {path:?}: {source}")]
    PathError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization failures for persisted data
    #[error(transparent)]
    BincodeError(#[from] bincode::Error),

    /// On-disk structure inconsistent with expected invariants
    #[error("Data corruption detected at {location}: {reason}")]
    DataCorruption { location: String, reason: String },

    /// Requested index, peer or snapshot is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller supplied arguments that violate the store's contract
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Embedded database errors
    #[error("Embedded database error: {0}")]
    DbError(String),

    /// Value conversion failures
    #[error("Value convert failed")]
    Convert(#[from] ConvertError),
}

/// Error type for value conversion operations
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// Invalid input length error
    ///
    /// This occurs when the input byte slice length doesn't match the required 8 bytes.
    #[error("invalid byte length: expected 8 bytes, received {0} bytes")]
    InvalidLength(usize),

    /// Generic conversion failure with detailed message
    #[error("conversion failure: {0}")]
    ConversionFailure(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A backend already claimed this scheme
    #[error("Storage scheme already registered: {0}")]
    AlreadyRegistered(String),

    /// Malformed storage locator
    #[error("Invalid storage URI {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },

    /// No backend registered for the scheme
    #[error("No storage registered for scheme {0:?}")]
    SchemeNotFound(String),
}

impl StorageError {
    pub(crate) fn corruption(
        location: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        StorageError::DataCorruption {
            location: location.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn at_path(
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        StorageError::PathError {
            path: path.into(),
            source,
        }
    }
}

impl Error {
    /// True for `IntegrityError`-class failures
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Storage(StorageError::DataCorruption { .. }))
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Error::Storage(StorageError::InvalidArgument(_)))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Storage(StorageError::NotFound(_)) | Error::Registry(RegistryError::SchemeNotFound(_))
        )
    }

    pub fn is_io(&self) -> bool {
        matches!(
            self,
            Error::Storage(StorageError::IoError(_)) | Error::Storage(StorageError::PathError { .. })
        )
    }
}

// ============== Conversion Implementations ============== //

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(StorageError::IoError(e))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Storage(StorageError::BincodeError(e))
    }
}

impl From<ConvertError> for Error {
    fn from(e: ConvertError) -> Self {
        Error::Storage(StorageError::Convert(e))
    }
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        match err {
            sled::Error::Io(e) => StorageError::IoError(e).into(),
            sled::Error::Corruption { at, .. } => StorageError::corruption(
                format!("sled:{at:?}"),
                "sled reported corrupted data",
            )
            .into(),
            other => StorageError::DbError(other.to_string()).into(),
        }
    }
}
