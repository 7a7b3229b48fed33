//! Errors raised by the volume host and its backends.

use std::path::PathBuf;
use thiserror::Error;
use vdu_provider::ProviderError;

/// Errors that can occur during mount operations.
#[derive(Error, Debug)]
pub enum MountError {
    /// The cache root could not be created or secured.
    #[error("Cache root {path}: {source}")]
    CacheRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another host holds the lock on the cache root.
    #[error("Cache root {0} is locked by another process")]
    Locked(PathBuf),

    /// The provider could not be created over the cache root.
    #[error("Failed to create filesystem: {0}")]
    FilesystemCreation(#[from] ProviderError),

    /// OS-level mount operation failed.
    #[error("Failed to mount: {0}")]
    Mount(#[from] std::io::Error),

    /// The mount point string could not be parsed.
    #[error("Invalid mount point: {0:?}")]
    InvalidMountPoint(String),

    /// Attempted to stop a host that isn't mounted.
    #[error("Volume is not mounted")]
    NotMounted,

    /// Attempted to start a host that is already mounted.
    #[error("Volume is already mounted at {0}")]
    AlreadyMounted(String),

    /// The requested backend is not available on this system.
    #[error("Backend not available: {0}")]
    BackendUnavailable(String),

    /// Unmount operation failed.
    #[error("Unmount failed: {0}")]
    UnmountFailed(String),
}

/// Result alias for mount operations.
pub type MountResult<T> = Result<T, MountError>;
