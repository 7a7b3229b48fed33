//! The hidden cache directory backing a mounted volume.
//!
//! [`CacheRoot::prepare`] creates the directory if needed, restricts it to
//! the owner and takes an exclusive `flock` on it. The lock lives as long as
//! the returned value, so two hosts can never serve the same cache root.

use crate::error::{MountError, MountResult};
use fs2::FileExt;
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Owner-only permissions applied to the cache root.
pub const CACHE_ROOT_MODE: u32 = 0o700;

/// A prepared, exclusively locked cache root.
#[derive(Debug)]
pub struct CacheRoot {
    path: PathBuf,
    lock: File,
}

impl CacheRoot {
    /// Creates (if absent), restricts and locks `path`.
    ///
    /// Fails with [`MountError::Locked`] when another holder has the lock.
    pub fn prepare(path: &Path) -> MountResult<Self> {
        let io_err = |source: io::Error| MountError::CacheRoot {
            path: path.to_path_buf(),
            source,
        };

        if !path.exists() {
            fs::create_dir_all(path).map_err(io_err)?;
            debug!(path = %path.display(), "Created cache root");
        }
        let meta = fs::metadata(path).map_err(io_err)?;
        if !meta.is_dir() {
            return Err(io_err(io::Error::new(
                io::ErrorKind::NotADirectory,
                "not a directory",
            )));
        }
        if meta.permissions().mode() & 0o777 != CACHE_ROOT_MODE {
            fs::set_permissions(path, fs::Permissions::from_mode(CACHE_ROOT_MODE))
                .map_err(io_err)?;
        }

        let lock = File::open(path).map_err(io_err)?;
        match lock.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                return Err(MountError::Locked(path.to_path_buf()));
            }
            Err(e) => return Err(io_err(e)),
        }

        info!(path = %path.display(), "Cache root locked");
        Ok(Self {
            path: path.to_path_buf(),
            lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CacheRoot {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.lock) {
            debug!(path = %self.path.display(), error = %e, "Cache root unlock failed");
        }
    }
}
