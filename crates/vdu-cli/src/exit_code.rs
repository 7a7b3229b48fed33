//! Process exit codes.
//!
//! The values are the session [`ResultCode`]s, so scripts driving the
//! harness see the same numbers whichever layer failed.

use std::io;
use vdu_mount::MountError;
use vdu_session::{ResultCode, SessionError};

pub const SUCCESS: u8 = ResultCode::Success.as_u8();
pub const GENERAL_ERROR: u8 = ResultCode::General.as_u8();
pub const USAGE: u8 = ResultCode::Usage.as_u8();
pub const PERMISSION_DENIED: u8 = ResultCode::PermissionDenied.as_u8();
pub const MOUNT_FAILED: u8 = ResultCode::MountFailed.as_u8();
pub const NOT_FOUND: u8 = ResultCode::NotFound.as_u8();

/// Maps an error chain to an exit code using the first typed cause found.
pub fn categorize(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(session_err) = cause.downcast_ref::<SessionError>() {
            return session_err.code().as_u8();
        }

        if let Some(mount_err) = cause.downcast_ref::<MountError>() {
            return match mount_err {
                MountError::InvalidMountPoint(_) => USAGE,
                MountError::CacheRoot { source, .. }
                    if source.kind() == io::ErrorKind::PermissionDenied =>
                {
                    PERMISSION_DENIED
                }
                _ => MOUNT_FAILED,
            };
        }

        if cause.downcast_ref::<toml::de::Error>().is_some() {
            return USAGE;
        }

        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::PermissionDenied => return PERMISSION_DENIED,
                io::ErrorKind::NotFound => return NOT_FOUND,
                _ => {}
            }
        }
    }
    GENERAL_ERROR
}
