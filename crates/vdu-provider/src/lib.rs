//! NT-semantics filesystem provider backed by a local cache directory.
//!
//! This crate implements the callback contract of a filesystem-virtualization
//! framework (create, open, read, write, flush, rename, delete, security and
//! continuation-based enumeration) on top of an ordinary Unix directory. It
//! is framework-agnostic: the FUSE adapter in `vdu-mount` drives it through
//! POSIX errno translation, and an NT-facing framework can drive it through
//! [`ProviderError::to_ntstatus`].
//!
//! # Components
//!
//! - [`PathMapper`]: virtual path to backing path, case-insensitive and
//!   case-preserving, never escaping the root
//! - [`DescriptorTable`]: generation-checked arena of open handles
//! - [`FileSystemProvider`]: the callbacks themselves
//!
//! # Example
//!
//! ```no_run
//! use vdu_provider::{AccessMask, CleanupFlags, CreateOptions, FileSystemProvider, ProviderConfig};
//!
//! let provider = FileSystemProvider::new("/var/cache/vdu".as_ref(), ProviderConfig::default())?;
//! let created = provider.create(
//!     "\\a.txt",
//!     CreateOptions::empty(),
//!     AccessMask::GENERIC_WRITE,
//!     0,
//!     None,
//!     0,
//! )?;
//! provider.write(created.handle, b"hello", 0, false, false)?;
//! provider.cleanup(created.handle, Some("\\a.txt"), CleanupFlags::empty())?;
//! provider.close(created.handle)?;
//! # Ok::<(), vdu_provider::ProviderError>(())
//! ```

pub mod config;
pub mod descriptor;
pub mod enumeration;
pub mod error;
pub mod info;
pub mod metadata;
mod native;
pub mod path_mapper;
pub mod provider;
pub mod security;

pub use config::{AccessGate, DEFAULT_VOLUME_LABEL, ProviderConfig};
pub use descriptor::{DescriptorHandle, DescriptorTable, FileDescriptor};
pub use enumeration::{DirectoryCursor, NamePattern};
pub use error::{ErrorKind, ProviderError, ProviderResult, ntstatus};
pub use info::{
    ALLOCATION_UNIT, AccessMask, CleanupFlags, CreateOptions, DirInfo, FileAttributes, FileInfo,
    FileSecurity, FileTime, INVALID_FILE_ATTRIBUTES, VolumeInfo, VolumeParams,
    allocation_size_for, filetime_from_system, system_from_filetime,
};
pub use path_mapper::PathMapper;
pub use provider::{BasicInfo, FileSystemProvider, Opened, Written};
pub use security::{SecurityDescriptor, SecurityInformation};
