//! NT metadata persisted alongside backing files.
//!
//! The backing store natively tracks size, access time and modification
//! time. Attributes, creation time and security descriptors live in
//! extended attributes:
//!
//! - `user.vdu.info`: attributes (`u32` LE) followed by creation FILETIME (`u64` LE)
//! - `user.vdu.security`: self-relative security descriptor
//!
//! READONLY is additionally mirrored into the owner write bit so that other
//! processes looking at the cache observe it. Filesystems without extended
//! attribute support fall back to derived values.

use crate::error::{ProviderError, ProviderResult};
use crate::info::{
    FileAttributes, FileInfo, FileTime, allocation_size_for, filetime_from_system,
    system_from_filetime,
};
use crate::security::SecurityDescriptor;
use std::ffi::CStr;
use std::fs::{self, File, Metadata};
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::debug;

const INFO_XATTR: &CStr = c"user.vdu.info";
const SECURITY_XATTR: &CStr = c"user.vdu.security";
const INFO_LEN: usize = 12;

/// Largest security descriptor we are willing to read back.
const MAX_SECURITY_LEN: usize = 64 * 1024;

/// Attributes and creation time kept in `user.vdu.info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredInfo {
    pub attributes: FileAttributes,
    pub creation_time: FileTime,
}

impl StoredInfo {
    fn encode(self) -> [u8; INFO_LEN] {
        let mut out = [0u8; INFO_LEN];
        out[..4].copy_from_slice(&self.attributes.bits().to_le_bytes());
        out[4..].copy_from_slice(&self.creation_time.to_le_bytes());
        out
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != INFO_LEN {
            return None;
        }
        let attrs = u32::from_le_bytes(bytes[..4].try_into().ok()?);
        let ctime = u64::from_le_bytes(bytes[4..].try_into().ok()?);
        Some(Self {
            attributes: FileAttributes::from_bits_truncate(attrs),
            creation_time: ctime,
        })
    }
}

/// Builds the full [`FileInfo`] for an open backing object.
pub fn query(file: &File) -> ProviderResult<FileInfo> {
    let meta = file
        .metadata()
        .map_err(|e| ProviderError::from_io("stat", "<handle>", e))?;
    let stored = load_info(file);
    Ok(compose(&meta, stored))
}

/// Builds the [`FileInfo`] for a backing path without an open descriptor.
///
/// Objects that cannot be opened for reading are described from native
/// metadata alone.
pub fn query_path(path: &Path) -> ProviderResult<FileInfo> {
    match File::open(path) {
        Ok(file) => query(&file),
        Err(_) => {
            let meta = fs::symlink_metadata(path)
                .map_err(|e| ProviderError::from_io("stat", &path.display().to_string(), e))?;
            Ok(compose(&meta, None))
        }
    }
}

/// Combines native metadata with stored NT metadata.
pub fn compose(meta: &Metadata, stored: Option<StoredInfo>) -> FileInfo {
    let is_dir = meta.is_dir();
    let mut attrs = stored.map_or(FileAttributes::empty(), |s| s.attributes);
    // Permission bits are authoritative for READONLY on files.
    if !is_dir {
        attrs.set(FileAttributes::READONLY, meta.permissions().readonly());
    }
    let attrs = attrs.presented(is_dir);

    let modified = meta.modified().map_or(0, filetime_from_system);
    let accessed = meta.accessed().map_or(modified, filetime_from_system);
    let created = stored
        .map(|s| s.creation_time)
        .filter(|t| *t != 0)
        .or_else(|| meta.created().ok().map(filetime_from_system))
        .unwrap_or(modified);
    let file_size = if is_dir { 0 } else { meta.len() };

    FileInfo {
        file_attributes: attrs.bits(),
        reparse_tag: 0,
        allocation_size: allocation_size_for(file_size),
        file_size,
        creation_time: created,
        last_access_time: accessed,
        last_write_time: modified,
        change_time: modified,
        index_number: 0,
        hard_links: 0,
        ea_size: 0,
    }
}

/// Reads `user.vdu.info`, returning `None` when absent or unsupported.
pub fn load_info(file: &File) -> Option<StoredInfo> {
    let mut buf = [0u8; INFO_LEN];
    match get_xattr(file, INFO_XATTR, &mut buf) {
        Ok(n) => StoredInfo::decode(&buf[..n]),
        Err(e) => {
            if !is_absent(&e) {
                debug!(error = %e, "Failed to read stored file info");
            }
            None
        }
    }
}

/// Persists attributes and creation time.
///
/// Only persistent attribute bits are stored. READONLY is mirrored into the
/// permission bits for files. Missing extended attribute support is not an
/// error; the values are simply not retained.
pub fn store_info(file: &File, info: StoredInfo) -> ProviderResult<()> {
    let attributes = info.attributes.persistent();
    let encoded = StoredInfo {
        attributes,
        creation_time: info.creation_time,
    }
    .encode();
    write_xattr(file, INFO_XATTR, &encoded)?;

    let meta = file
        .metadata()
        .map_err(|e| ProviderError::from_io("stat", "<handle>", e))?;
    if !meta.is_dir() {
        let mode = meta.permissions().mode();
        let wanted = if attributes.contains(FileAttributes::READONLY) {
            mode & !0o222
        } else {
            mode | 0o200
        };
        if wanted != mode {
            chmod(file, wanted)?;
        }
    }
    Ok(())
}

/// Reads the stored security descriptor, or the default when none is stored.
pub fn load_security(file: &File) -> Vec<u8> {
    let mut buf = vec![0u8; MAX_SECURITY_LEN];
    match get_xattr(file, SECURITY_XATTR, &mut buf) {
        Ok(n) => {
            buf.truncate(n);
            if SecurityDescriptor::parse(&buf).is_ok() {
                return buf;
            }
            debug!(len = n, "Stored security descriptor is malformed; using default");
        }
        Err(e) => {
            if !is_absent(&e) {
                debug!(error = %e, "Failed to read security descriptor");
            }
        }
    }
    SecurityDescriptor::default().to_bytes()
}

/// Stores a security descriptor.
pub fn store_security(file: &File, descriptor: &[u8]) -> ProviderResult<()> {
    write_xattr(file, SECURITY_XATTR, descriptor)
}

/// Writes an extended attribute, lifting a read-only mode for the duration.
fn write_xattr(file: &File, name: &CStr, value: &[u8]) -> ProviderResult<()> {
    let meta = file
        .metadata()
        .map_err(|e| ProviderError::from_io("stat", "<handle>", e))?;
    let mode = meta.permissions().mode();
    let lifted = meta.is_file() && mode & 0o200 == 0;
    if lifted {
        chmod(file, mode | 0o200)?;
    }
    let result = set_xattr(file, name, value);
    if lifted {
        chmod(file, mode)?;
    }
    match result {
        Ok(()) => Ok(()),
        Err(e) if is_unsupported(&e) => {
            debug!(name = ?name, "Extended attributes unsupported; value not persisted");
            Ok(())
        }
        Err(e) => Err(ProviderError::from_io("setxattr", "<handle>", e)),
    }
}

fn chmod(file: &File, mode: u32) -> ProviderResult<()> {
    file.set_permissions(fs::Permissions::from_mode(mode))
        .map_err(|e| ProviderError::from_io("chmod", "<handle>", e))
}

/// Whether the filesystem holding `file` accepts `user.*` extended attributes.
pub fn supports_xattrs(file: &File) -> bool {
    const PROBE: &CStr = c"user.vdu.probe";
    match set_xattr(file, PROBE, b"1") {
        Ok(()) => {
            let _ = remove_xattr(file, PROBE);
            true
        }
        Err(_) => false,
    }
}

fn is_unsupported(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(code) if code == libc::ENOTSUP || code == libc::EOPNOTSUPP)
}

#[cfg(target_os = "linux")]
fn is_absent(e: &io::Error) -> bool {
    is_unsupported(e) || e.raw_os_error() == Some(libc::ENODATA)
}

#[cfg(target_os = "macos")]
fn is_absent(e: &io::Error) -> bool {
    is_unsupported(e) || e.raw_os_error() == Some(libc::ENOATTR)
}

fn check_len(ret: libc::ssize_t) -> io::Result<usize> {
    usize::try_from(ret).map_err(|_| io::Error::last_os_error())
}

fn check_unit(ret: libc::c_int) -> io::Result<()> {
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(target_os = "linux")]
fn get_xattr(file: &File, name: &CStr, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: the fd is valid for the lifetime of `file`, `name` is
    // NUL-terminated, and `buf` is a writable region of `buf.len()` bytes.
    let ret = unsafe {
        libc::fgetxattr(
            file.as_raw_fd(),
            name.as_ptr(),
            buf.as_mut_ptr().cast(),
            buf.len(),
        )
    };
    check_len(ret)
}

#[cfg(target_os = "macos")]
fn get_xattr(file: &File, name: &CStr, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: see the Linux variant.
    let ret = unsafe {
        libc::fgetxattr(
            file.as_raw_fd(),
            name.as_ptr(),
            buf.as_mut_ptr().cast(),
            buf.len(),
            0,
            0,
        )
    };
    check_len(ret)
}

#[cfg(target_os = "linux")]
fn set_xattr(file: &File, name: &CStr, value: &[u8]) -> io::Result<()> {
    // SAFETY: the fd is valid, `name` is NUL-terminated, `value` is readable.
    let ret = unsafe {
        libc::fsetxattr(
            file.as_raw_fd(),
            name.as_ptr(),
            value.as_ptr().cast(),
            value.len(),
            0,
        )
    };
    check_unit(ret)
}

#[cfg(target_os = "macos")]
fn set_xattr(file: &File, name: &CStr, value: &[u8]) -> io::Result<()> {
    // SAFETY: see the Linux variant.
    let ret = unsafe {
        libc::fsetxattr(
            file.as_raw_fd(),
            name.as_ptr(),
            value.as_ptr().cast(),
            value.len(),
            0,
            0,
        )
    };
    check_unit(ret)
}

#[cfg(target_os = "linux")]
fn remove_xattr(file: &File, name: &CStr) -> io::Result<()> {
    // SAFETY: the fd is valid and `name` is NUL-terminated.
    check_unit(unsafe { libc::fremovexattr(file.as_raw_fd(), name.as_ptr()) })
}

#[cfg(target_os = "macos")]
fn remove_xattr(file: &File, name: &CStr) -> io::Result<()> {
    // SAFETY: the fd is valid and `name` is NUL-terminated.
    check_unit(unsafe { libc::fremovexattr(file.as_raw_fd(), name.as_ptr(), 0) })
}

/// Converts a FILETIME to the `filetime` crate's representation.
pub fn to_native_time(ft: FileTime) -> filetime::FileTime {
    filetime::FileTime::from_system_time(system_from_filetime(ft))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_stored_info_layout() {
        let info = StoredInfo {
            attributes: FileAttributes::HIDDEN | FileAttributes::ARCHIVE,
            creation_time: 0x0102_0304_0506_0708,
        };
        let bytes = info.encode();
        assert_eq!(&bytes[..4], &0x22u32.to_le_bytes());
        assert_eq!(&bytes[4..], &0x0102_0304_0506_0708u64.to_le_bytes());
        assert_eq!(StoredInfo::decode(&bytes), Some(info));
        assert_eq!(StoredInfo::decode(&bytes[..5]), None);
    }

    #[test]
    fn test_query_regular_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.bin");
        fs::write(&path, vec![7u8; 5000]).unwrap();
        let file = File::open(&path).unwrap();

        let info = query(&file).unwrap();
        assert_eq!(info.file_size, 5000);
        assert_eq!(info.allocation_size, 8192);
        assert_eq!(info.change_time, info.last_write_time);
        assert_eq!(info.reparse_tag, 0);
        assert_eq!(info.index_number, 0);
        assert_eq!(info.hard_links, 0);
        assert!(!info.is_directory());
        assert_ne!(info.creation_time, 0);
    }

    #[test]
    fn test_query_directory() {
        let dir = TempDir::new().unwrap();
        let file = File::open(dir.path()).unwrap();
        let info = query(&file).unwrap();
        assert!(info.is_directory());
        assert_eq!(info.file_size, 0);
        assert_eq!(info.allocation_size, 0);
    }

    #[test]
    fn test_readonly_mirrored_to_permissions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ro.txt");
        fs::write(&path, b"x").unwrap();
        let file = File::open(&path).unwrap();

        store_info(
            &file,
            StoredInfo {
                attributes: FileAttributes::READONLY,
                creation_time: 0,
            },
        )
        .unwrap();
        assert!(fs::metadata(&path).unwrap().permissions().readonly());
        assert!(query(&file).unwrap().attributes().contains(FileAttributes::READONLY));

        store_info(
            &file,
            StoredInfo {
                attributes: FileAttributes::empty(),
                creation_time: 0,
            },
        )
        .unwrap();
        assert!(!fs::metadata(&path).unwrap().permissions().readonly());
        assert_eq!(query(&file).unwrap().attributes(), FileAttributes::NORMAL);
    }

    #[test]
    fn test_stored_info_persists_when_supported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("h.txt");
        fs::write(&path, b"x").unwrap();
        let file = File::open(&path).unwrap();
        if !supports_xattrs(&file) {
            return;
        }

        let stored = StoredInfo {
            attributes: FileAttributes::HIDDEN | FileAttributes::DIRECTORY,
            creation_time: 130_000_000_000_000_000,
        };
        store_info(&file, stored).unwrap();

        let loaded = load_info(&file).unwrap();
        assert_eq!(loaded.attributes, FileAttributes::HIDDEN);
        let info = query(&file).unwrap();
        assert_eq!(info.creation_time, 130_000_000_000_000_000);
        assert_eq!(info.attributes(), FileAttributes::HIDDEN);
    }

    #[test]
    fn test_security_defaults_and_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.txt");
        fs::write(&path, b"x").unwrap();
        let file = File::open(&path).unwrap();

        assert_eq!(load_security(&file), SecurityDescriptor::default().to_bytes());
        if !supports_xattrs(&file) {
            return;
        }
        let sd = crate::security::tests::sample_descriptor();
        store_security(&file, &sd).unwrap();
        assert_eq!(load_security(&file), sd);
    }
}
