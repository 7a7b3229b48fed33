//! Error taxonomy for provider callbacks.
//!
//! Every callback returns a [`ProviderError`] on failure; nothing panics or
//! unwinds past the provider boundary. Errors can be presented three ways:
//!
//! - [`ErrorKind`]: the coarse classification callers branch on
//! - [`ProviderError::to_ntstatus`]: the NTSTATUS an NT-facing framework returns
//! - [`ProviderError::to_errno`]: the POSIX errno the FUSE adapter returns

use std::io;
use thiserror::Error;

/// NTSTATUS values returned to NT-facing frameworks.
///
/// These are part of the compatibility boundary and must stay bit-exact.
#[allow(clippy::cast_possible_wrap)]
pub mod ntstatus {
    /// The operation completed successfully.
    pub const STATUS_SUCCESS: i32 = 0;
    /// The data was too large to fit into the specified buffer.
    pub const STATUS_BUFFER_OVERFLOW: i32 = 0x8000_0005_u32 as i32;
    /// No more files were found which match the file specification.
    pub const STATUS_NO_MORE_FILES: i32 = 0x8000_0006_u32 as i32;
    /// An invalid handle was specified.
    pub const STATUS_INVALID_HANDLE: i32 = 0xC000_0008_u32 as i32;
    /// An invalid parameter was passed to a service or function.
    pub const STATUS_INVALID_PARAMETER: i32 = 0xC000_000D_u32 as i32;
    /// A process has requested access to an object but has not been granted those rights.
    pub const STATUS_ACCESS_DENIED: i32 = 0xC000_0022_u32 as i32;
    /// The object name is invalid.
    pub const STATUS_OBJECT_NAME_INVALID: i32 = 0xC000_0033_u32 as i32;
    /// The object name is not found.
    pub const STATUS_OBJECT_NAME_NOT_FOUND: i32 = 0xC000_0034_u32 as i32;
    /// The object name already exists.
    pub const STATUS_OBJECT_NAME_COLLISION: i32 = 0xC000_0035_u32 as i32;
    /// The path does not exist.
    pub const STATUS_OBJECT_PATH_NOT_FOUND: i32 = 0xC000_003A_u32 as i32;
    /// The security descriptor structure is not valid.
    pub const STATUS_INVALID_SECURITY_DESCR: i32 = 0xC000_0079_u32 as i32;
    /// The disk is full.
    pub const STATUS_DISK_FULL: i32 = 0xC000_007F_u32 as i32;
    /// The file that was specified as a target is a directory.
    pub const STATUS_FILE_IS_A_DIRECTORY: i32 = 0xC000_00BA_u32 as i32;
    /// An attempt has been made to remove a file or directory that cannot be deleted.
    pub const STATUS_CANNOT_DELETE: i32 = 0xC000_0121_u32 as i32;
    /// Indicates that the directory trying to be deleted is not empty.
    pub const STATUS_DIRECTORY_NOT_EMPTY: i32 = 0xC000_0101_u32 as i32;
    /// A requested opened file is not a directory.
    pub const STATUS_NOT_A_DIRECTORY: i32 = 0xC000_0103_u32 as i32;
    /// An I/O operation was attempted on a file object that has been closed.
    pub const STATUS_FILE_CLOSED: i32 = 0xC000_0128_u32 as i32;
    /// The I/O device reported an I/O error.
    pub const STATUS_IO_DEVICE_ERROR: i32 = 0xC000_0185_u32 as i32;
}

/// Coarse classification of provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Path mapping rejected the input (escapes root, too long, malformed).
    PathInvalid,
    /// The object (or its parent) does not exist.
    NotFound,
    /// The object already exists.
    AlreadyExists,
    /// The backing store refused the operation.
    AccessDenied,
    /// The handle was invalidated by a delete-on-close cleanup.
    StaleHandle,
    /// The handle was never issued or has already been closed.
    InvalidHandle,
    /// The caller's buffer cannot hold the result; the required size is attached.
    BufferOverflow,
    /// Read/write/flush/attribute failure at the backing store.
    IoFailure,
}

/// Errors produced by provider callbacks.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Path mapping rejected the input.
    #[error("Invalid path: {0}")]
    PathInvalid(String),

    /// The object does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An intermediate directory of the path does not exist.
    #[error("Parent directory not found: {0}")]
    ParentNotFound(String),

    /// The object already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The backing store or the access gate refused the operation.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Directory not empty.
    #[error("Directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// The object carries the read-only attribute and cannot be deleted.
    #[error("Cannot delete read-only object: {0}")]
    CannotDelete(String),

    /// A directory was required.
    #[error("Not a directory: {0}")]
    NotADirectory(String),

    /// A non-directory was required.
    #[error("Is a directory: {0}")]
    IsADirectory(String),

    /// The handle was never issued or has been closed.
    #[error("Invalid handle: {0:#x}")]
    InvalidHandle(u64),

    /// The handle's native resource was released by a delete-on-close cleanup.
    #[error("Stale handle: {0:#x}")]
    StaleHandle(u64),

    /// Output buffer too small.
    #[error("Buffer too small: {required} bytes required")]
    BufferOverflow {
        /// Size the caller must provide to succeed.
        required: usize,
    },

    /// The supplied security descriptor is malformed.
    #[error("Invalid security descriptor: {0}")]
    InvalidSecurityDescriptor(&'static str),

    /// A parameter is outside its valid range.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// Native I/O failure that has no more specific translation.
    #[error("{op} failed: {source}")]
    Io {
        /// The provider operation that failed.
        op: &'static str,
        /// The backing store's native error.
        #[source]
        source: io::Error,
    },
}

impl ProviderError {
    /// Translates a native error into the taxonomy.
    ///
    /// `target` names the object involved and is only used for messages.
    pub fn from_io(op: &'static str, target: &str, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound(target.to_string()),
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(target.to_string()),
            io::ErrorKind::PermissionDenied => Self::AccessDenied(target.to_string()),
            io::ErrorKind::DirectoryNotEmpty => Self::DirectoryNotEmpty(target.to_string()),
            io::ErrorKind::NotADirectory => Self::NotADirectory(target.to_string()),
            io::ErrorKind::IsADirectory => Self::IsADirectory(target.to_string()),
            _ => Self::Io { op, source },
        }
    }

    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PathInvalid(_) | Self::InvalidParameter(_) | Self::InvalidSecurityDescriptor(_) => {
                ErrorKind::PathInvalid
            }
            Self::NotFound(_) | Self::ParentNotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::AccessDenied(_) | Self::CannotDelete(_) | Self::DirectoryNotEmpty(_) => {
                ErrorKind::AccessDenied
            }
            Self::StaleHandle(_) => ErrorKind::StaleHandle,
            Self::InvalidHandle(_) => ErrorKind::InvalidHandle,
            Self::BufferOverflow { .. } => ErrorKind::BufferOverflow,
            Self::NotADirectory(_) | Self::IsADirectory(_) | Self::Io { .. } => ErrorKind::IoFailure,
        }
    }

    /// Converts this error to the NTSTATUS an NT-facing framework expects.
    pub fn to_ntstatus(&self) -> i32 {
        use ntstatus::*;
        match self {
            Self::PathInvalid(_) => STATUS_OBJECT_NAME_INVALID,
            Self::NotFound(_) => STATUS_OBJECT_NAME_NOT_FOUND,
            Self::ParentNotFound(_) => STATUS_OBJECT_PATH_NOT_FOUND,
            Self::AlreadyExists(_) => STATUS_OBJECT_NAME_COLLISION,
            Self::AccessDenied(_) => STATUS_ACCESS_DENIED,
            Self::DirectoryNotEmpty(_) => STATUS_DIRECTORY_NOT_EMPTY,
            Self::CannotDelete(_) => STATUS_CANNOT_DELETE,
            Self::NotADirectory(_) => STATUS_NOT_A_DIRECTORY,
            Self::IsADirectory(_) => STATUS_FILE_IS_A_DIRECTORY,
            Self::InvalidHandle(_) => STATUS_INVALID_HANDLE,
            Self::StaleHandle(_) => STATUS_FILE_CLOSED,
            Self::BufferOverflow { .. } => STATUS_BUFFER_OVERFLOW,
            Self::InvalidSecurityDescriptor(_) => STATUS_INVALID_SECURITY_DESCR,
            Self::InvalidParameter(_) => STATUS_INVALID_PARAMETER,
            Self::Io { source, .. } => match source.raw_os_error() {
                Some(libc::ENOSPC) => STATUS_DISK_FULL,
                Some(libc::EACCES | libc::EPERM | libc::EROFS) => STATUS_ACCESS_DENIED,
                Some(libc::EINVAL) => STATUS_INVALID_PARAMETER,
                _ => STATUS_IO_DEVICE_ERROR,
            },
        }
    }

    /// Converts this error to a libc error code for FUSE.
    pub fn to_errno(&self) -> i32 {
        match self {
            Self::PathInvalid(_) | Self::InvalidParameter(_) | Self::InvalidSecurityDescriptor(_) => {
                libc::EINVAL
            }
            Self::NotFound(_) | Self::ParentNotFound(_) => libc::ENOENT,
            Self::AlreadyExists(_) => libc::EEXIST,
            Self::AccessDenied(_) | Self::CannotDelete(_) => libc::EACCES,
            Self::DirectoryNotEmpty(_) => libc::ENOTEMPTY,
            Self::NotADirectory(_) => libc::ENOTDIR,
            Self::IsADirectory(_) => libc::EISDIR,
            Self::InvalidHandle(_) | Self::StaleHandle(_) => libc::EBADF,
            Self::BufferOverflow { .. } => libc::ERANGE,
            Self::Io { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

/// Result type for provider callbacks.
pub type ProviderResult<T> = Result<T, ProviderError>;
