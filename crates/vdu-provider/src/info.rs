//! Records exchanged with the filesystem framework.
//!
//! Field layouts mirror the framework's file-info and volume records. Sizes
//! are reported in allocation units, reparse tags, index numbers and hard
//! link counts are always zero, and the change time aliases the last write
//! time.

use bitflags::bitflags;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Bytes per sector reported for the volume.
pub const SECTOR_SIZE: u16 = 4096;

/// Sectors per allocation unit reported for the volume.
pub const SECTORS_PER_ALLOCATION_UNIT: u16 = 1;

/// Rounding granularity for allocation sizes.
pub const ALLOCATION_UNIT: u64 = SECTOR_SIZE as u64 * SECTORS_PER_ALLOCATION_UNIT as u64;

/// Maximum length of a single path component, in bytes.
pub const MAX_COMPONENT_LENGTH: usize = 255;

/// Attribute value meaning "leave attributes unchanged".
pub const INVALID_FILE_ATTRIBUTES: u32 = 0xFFFF_FFFF;

/// 100ns intervals between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_EPOCH: u64 = 116_444_736_000_000_000;

bitflags! {
    /// NT file attribute bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FileAttributes: u32 {
        const READONLY = 0x0000_0001;
        const HIDDEN = 0x0000_0002;
        const SYSTEM = 0x0000_0004;
        const DIRECTORY = 0x0000_0010;
        const ARCHIVE = 0x0000_0020;
        const NORMAL = 0x0000_0080;
        const TEMPORARY = 0x0000_0100;
        const SPARSE_FILE = 0x0000_0200;
        const REPARSE_POINT = 0x0000_0400;
        const COMPRESSED = 0x0000_0800;
        const OFFLINE = 0x0000_1000;
        const NOT_CONTENT_INDEXED = 0x0000_2000;
        const ENCRYPTED = 0x0000_4000;
    }
}

impl FileAttributes {
    /// Bits that describe the object's type and are never stored.
    pub const DERIVED: Self = Self::DIRECTORY.union(Self::NORMAL);

    /// Normalizes the wire value used by create and overwrite: `0` means "normal file".
    pub fn from_request(raw: u32) -> Self {
        if raw == 0 {
            Self::NORMAL
        } else {
            Self::from_bits_truncate(raw)
        }
    }

    /// Bits worth persisting (everything except type-derived bits).
    pub fn persistent(self) -> Self {
        self.difference(Self::DERIVED)
    }

    /// Applies NT presentation rules: directories carry DIRECTORY, files with
    /// no other bit carry NORMAL, and NORMAL never combines with other bits.
    pub fn presented(self, is_dir: bool) -> Self {
        let bits = self.persistent();
        if is_dir {
            bits | Self::DIRECTORY
        } else if bits.is_empty() {
            Self::NORMAL
        } else {
            bits
        }
    }
}

bitflags! {
    /// Create options passed to `create` and `open`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CreateOptions: u32 {
        const DIRECTORY_FILE = 0x0000_0001;
        const WRITE_THROUGH = 0x0000_0002;
        const SEQUENTIAL_ONLY = 0x0000_0004;
        const NO_INTERMEDIATE_BUFFERING = 0x0000_0008;
        const NON_DIRECTORY_FILE = 0x0000_0040;
        const RANDOM_ACCESS = 0x0000_0800;
        const DELETE_ON_CLOSE = 0x0000_1000;
        const OPEN_REPARSE_POINT = 0x0020_0000;
    }
}

bitflags! {
    /// NT access rights granted to a handle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessMask: u32 {
        const FILE_READ_DATA = 0x0000_0001;
        const FILE_WRITE_DATA = 0x0000_0002;
        const FILE_APPEND_DATA = 0x0000_0004;
        const FILE_READ_EA = 0x0000_0008;
        const FILE_WRITE_EA = 0x0000_0010;
        const FILE_EXECUTE = 0x0000_0020;
        const FILE_DELETE_CHILD = 0x0000_0040;
        const FILE_READ_ATTRIBUTES = 0x0000_0080;
        const FILE_WRITE_ATTRIBUTES = 0x0000_0100;
        const DELETE = 0x0001_0000;
        const READ_CONTROL = 0x0002_0000;
        const WRITE_DAC = 0x0004_0000;
        const WRITE_OWNER = 0x0008_0000;
        const SYNCHRONIZE = 0x0010_0000;
        const MAXIMUM_ALLOWED = 0x0200_0000;
        const GENERIC_ALL = 0x1000_0000;
        const GENERIC_EXECUTE = 0x2000_0000;
        const GENERIC_WRITE = 0x4000_0000;
        const GENERIC_READ = 0x8000_0000;
    }
}

impl AccessMask {
    /// Rights that require a writable native handle.
    pub const WRITE_LIKE: Self = Self::FILE_WRITE_DATA
        .union(Self::FILE_APPEND_DATA)
        .union(Self::GENERIC_WRITE)
        .union(Self::GENERIC_ALL);

    /// Whether the native handle must be opened for writing.
    pub fn wants_write(self) -> bool {
        self.intersects(Self::WRITE_LIKE)
    }
}

bitflags! {
    /// Flags passed to `cleanup`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CleanupFlags: u32 {
        const DELETE = 0x01;
        const SET_ALLOCATION_SIZE = 0x02;
        const SET_ARCHIVE_BIT = 0x10;
        const SET_LAST_ACCESS_TIME = 0x20;
        const SET_LAST_WRITE_TIME = 0x40;
        const SET_CHANGE_TIME = 0x80;
    }
}

/// Rounds a logical size up to the allocation unit.
#[inline]
pub fn allocation_size_for(file_size: u64) -> u64 {
    file_size.div_ceil(ALLOCATION_UNIT) * ALLOCATION_UNIT
}

/// NT FILETIME: 100ns ticks since 1601-01-01 UTC.
pub type FileTime = u64;

/// Converts a system time to FILETIME ticks. Times before 1601 clamp to zero.
pub fn filetime_from_system(time: SystemTime) -> FileTime {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => FILETIME_UNIX_EPOCH.saturating_add(ticks(after)),
        Err(before) => FILETIME_UNIX_EPOCH.saturating_sub(ticks(before.duration())),
    }
}

/// Converts FILETIME ticks back to a system time.
pub fn system_from_filetime(ft: FileTime) -> SystemTime {
    if ft >= FILETIME_UNIX_EPOCH {
        UNIX_EPOCH + duration_from_ticks(ft - FILETIME_UNIX_EPOCH)
    } else {
        UNIX_EPOCH - duration_from_ticks(FILETIME_UNIX_EPOCH - ft)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn ticks(d: Duration) -> u64 {
    (d.as_nanos() / 100).min(u128::from(u64::MAX)) as u64
}

fn duration_from_ticks(t: u64) -> Duration {
    Duration::new(t / 10_000_000, u32::try_from((t % 10_000_000) * 100).unwrap_or(0))
}

/// Metadata for one file or directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileInfo {
    /// NT attribute bits.
    pub file_attributes: u32,
    /// Always zero (reparse points are not tracked).
    pub reparse_tag: u32,
    /// `file_size` rounded up to [`ALLOCATION_UNIT`].
    pub allocation_size: u64,
    /// Logical size in bytes.
    pub file_size: u64,
    pub creation_time: FileTime,
    pub last_access_time: FileTime,
    pub last_write_time: FileTime,
    /// Always equal to `last_write_time`.
    pub change_time: FileTime,
    /// Always zero (index numbers are not tracked).
    pub index_number: u64,
    /// Always zero (hard links are not tracked).
    pub hard_links: u32,
    /// Always zero (extended attributes are not exposed).
    pub ea_size: u32,
}

impl FileInfo {
    /// Attribute bits as flags.
    pub fn attributes(&self) -> FileAttributes {
        FileAttributes::from_bits_truncate(self.file_attributes)
    }

    /// Whether this describes a directory.
    pub fn is_directory(&self) -> bool {
        self.attributes().contains(FileAttributes::DIRECTORY)
    }
}

/// One directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirInfo {
    /// Entry name as stored (case preserved).
    pub name: String,
    pub info: FileInfo,
}

/// Attributes and descriptor size returned by a by-name security query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSecurity {
    pub attributes: u32,
    /// Size of the object's security descriptor in bytes.
    pub security_size: usize,
}

/// Volume size report. Recomputed on every query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    pub total_size: u64,
    pub free_size: u64,
    pub volume_label: String,
}

/// Static volume parameters announced when the volume is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeParams {
    pub sector_size: u16,
    pub sectors_per_allocation_unit: u16,
    pub max_component_length: u16,
    pub volume_creation_time: FileTime,
    pub case_sensitive_search: bool,
    pub case_preserved_names: bool,
    pub unicode_on_disk: bool,
    pub persistent_acls: bool,
    pub post_cleanup_when_modified_only: bool,
    pub flush_and_purge_on_cleanup: bool,
    pub file_system_name: &'static str,
}

impl VolumeParams {
    /// Parameters for a volume whose root was created at `volume_creation_time`.
    pub fn new(volume_creation_time: FileTime) -> Self {
        Self {
            sector_size: SECTOR_SIZE,
            sectors_per_allocation_unit: SECTORS_PER_ALLOCATION_UNIT,
            #[allow(clippy::cast_possible_truncation)]
            max_component_length: MAX_COMPONENT_LENGTH as u16,
            volume_creation_time,
            case_sensitive_search: false,
            case_preserved_names: true,
            unicode_on_disk: true,
            persistent_acls: true,
            post_cleanup_when_modified_only: true,
            flush_and_purge_on_cleanup: true,
            file_system_name: "VDU",
        }
    }
}
