//! Volume hosting for the vdu filesystem provider.
//!
//! [`VolumeHost`] owns the locked cache root and the
//! [`FileSystemProvider`](vdu_provider::FileSystemProvider) serving it, and
//! mounts that provider through a [`MountBackend`]. The [`fuse`] module
//! provides the backend for Linux and macOS.
//!
//! # Example
//!
//! ```no_run
//! use vdu_mount::{FuseBackend, FuseOptions, VolumeHost};
//! use vdu_provider::ProviderConfig;
//!
//! let backend = FuseBackend::new(FuseOptions::default());
//! let mut host = VolumeHost::new(
//!     "/var/cache/vdu".as_ref(),
//!     ProviderConfig::default(),
//!     Box::new(backend),
//! )?;
//! host.start("X:".parse()?)?;
//! // ... serve until shutdown ...
//! host.stop()?;
//! # Ok::<(), vdu_mount::MountError>(())
//! ```

pub mod backend;
pub mod cache_root;
pub mod error;
#[cfg(any(target_os = "linux", target_os = "macos"))]
pub mod fuse;
pub mod host;

pub use backend::{MountBackend, MountHandle, MountPoint};
pub use cache_root::{CACHE_ROOT_MODE, CacheRoot};
pub use error::{MountError, MountResult};
#[cfg(any(target_os = "linux", target_os = "macos"))]
pub use fuse::{FuseBackend, FuseOptions};
pub use host::VolumeHost;
