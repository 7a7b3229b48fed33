//! The filesystem provider.
//!
//! [`FileSystemProvider`] answers every callback a filesystem-virtualization
//! framework issues for a mounted volume, using only the backing directory.
//! Callbacks may run concurrently on framework threads; the only shared
//! mutable state is the descriptor table, and each descriptor is guarded by
//! its own mutex so operations on one handle are serialized.
//!
//! Size and identity fields follow the framework's file-info layout exactly:
//! allocation sizes are rounded to [`ALLOCATION_UNIT`](crate::info::ALLOCATION_UNIT),
//! reparse tag, index number and hard-link count are zero, and the change
//! time is the last write time.

use crate::config::ProviderConfig;
use crate::descriptor::{DescriptorHandle, DescriptorRef, DescriptorTable, FileDescriptor};
use crate::enumeration::{DirectoryCursor, NamePattern};
use crate::error::{ProviderError, ProviderResult};
use crate::info::{
    AccessMask, CleanupFlags, CreateOptions, DirInfo, FileAttributes, FileInfo, FileSecurity,
    FileTime, INVALID_FILE_ATTRIBUTES, VolumeInfo, VolumeParams, filetime_from_system,
};
use crate::metadata::{self, StoredInfo};
use crate::native;
use crate::path_mapper::PathMapper;
use crate::security::{self, SecurityDescriptor, SecurityInformation};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, trace, warn};

/// Result of a successful `create` or `open`.
#[derive(Debug, Clone, Copy)]
pub struct Opened {
    pub handle: DescriptorHandle,
    pub info: FileInfo,
}

/// Result of a successful `write`.
#[derive(Debug, Clone, Copy)]
pub struct Written {
    pub bytes_written: usize,
    pub info: FileInfo,
}

/// Values for `set_basic_info`.
///
/// `file_attributes` of [`INVALID_FILE_ATTRIBUTES`] and times of `0` leave
/// the corresponding value unchanged.
#[derive(Debug, Clone, Copy)]
pub struct BasicInfo {
    pub file_attributes: u32,
    pub creation_time: FileTime,
    pub last_access_time: FileTime,
    pub last_write_time: FileTime,
    pub change_time: FileTime,
}

impl Default for BasicInfo {
    fn default() -> Self {
        Self {
            file_attributes: INVALID_FILE_ATTRIBUTES,
            creation_time: 0,
            last_access_time: 0,
            last_write_time: 0,
            change_time: 0,
        }
    }
}

/// NT-semantics provider over a backing directory.
#[derive(Debug)]
pub struct FileSystemProvider {
    mapper: PathMapper,
    descriptors: DescriptorTable,
    /// Serializes renames, which lock descriptors other than their own.
    renames: Mutex<()>,
    config: ProviderConfig,
    volume_creation_time: FileTime,
}

impl FileSystemProvider {
    /// Creates a provider rooted at `root`, which must be an existing directory.
    pub fn new(root: &Path, config: ProviderConfig) -> ProviderResult<Self> {
        let canonical = root
            .canonicalize()
            .map_err(|e| ProviderError::from_io("canonicalize", &root.display().to_string(), e))?;
        let root_info = metadata::query_path(&canonical)?;
        if !root_info.is_directory() {
            return Err(ProviderError::NotADirectory(canonical.display().to_string()));
        }
        info!(root = %canonical.display(), label = %config.volume_label, "Filesystem provider initialized");
        Ok(Self {
            mapper: PathMapper::new(canonical, config.max_path_len),
            descriptors: DescriptorTable::new(),
            renames: Mutex::new(()),
            config,
            volume_creation_time: root_info.creation_time,
        })
    }

    /// Canonical backing root.
    pub fn root(&self) -> &Path {
        self.mapper.root()
    }

    /// Static parameters announced to the framework.
    pub fn volume_params(&self) -> VolumeParams {
        VolumeParams::new(self.volume_creation_time)
    }

    /// Number of open descriptors.
    pub fn open_handles(&self) -> usize {
        self.descriptors.len()
    }

    fn check_gate(&self, op: &'static str) -> ProviderResult<()> {
        match &self.config.gate {
            Some(gate) if !gate.is_open() => {
                debug!(op, "Access gate closed");
                Err(ProviderError::AccessDenied(format!("{op}: volume locked")))
            }
            _ => Ok(()),
        }
    }

    // ========================================================================
    // Volume
    // ========================================================================

    /// Sums the sizes of the root's direct entries. Free size mirrors total.
    ///
    /// Enumeration errors count as zero; this never fails.
    pub fn get_volume_info(&self) -> VolumeInfo {
        let total_size = fs::read_dir(self.root())
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .filter_map(|entry| entry.metadata().ok())
                    .filter(fs::Metadata::is_file)
                    .map(|meta| meta.len())
                    .sum()
            })
            .unwrap_or_else(|e| {
                debug!(error = %e, "Volume size enumeration failed");
                0
            });
        VolumeInfo {
            total_size,
            free_size: total_size,
            volume_label: self.config.volume_label.clone(),
        }
    }

    // ========================================================================
    // Open / create / close
    // ========================================================================

    /// Returns attributes and the security descriptor size for `path`.
    ///
    /// When `descriptor` is supplied the security descriptor is copied into
    /// it; a buffer that is too small fails with `BufferOverflow` carrying
    /// the required size.
    pub fn get_security_by_name(
        &self,
        path: &str,
        descriptor: Option<&mut [u8]>,
    ) -> ProviderResult<FileSecurity> {
        trace!(path, "get_security_by_name");
        self.check_gate("get_security_by_name")?;
        let backing = self.mapper.resolve(path)?;
        let file = File::open(&backing).map_err(|e| ProviderError::from_io("open", path, e))?;
        let info = metadata::query(&file)?;
        let sd = metadata::load_security(&file);
        let security_size = security::copy_to_buffer(&sd, descriptor)?;
        Ok(FileSecurity {
            attributes: info.file_attributes,
            security_size,
        })
    }

    /// Creates a new file or directory. Never overwrites an existing object.
    pub fn create(
        &self,
        path: &str,
        options: CreateOptions,
        access: AccessMask,
        attributes: u32,
        security_descriptor: Option<&[u8]>,
        allocation_size: u64,
    ) -> ProviderResult<Opened> {
        trace!(path, ?options, ?access, attributes, "create");
        self.check_gate("create")?;
        let target = self.mapper.resolve_for_create(path)?;
        if target.existing.is_some() {
            return Err(ProviderError::AlreadyExists(path.to_string()));
        }
        if let Some(sd) = security_descriptor {
            SecurityDescriptor::parse(sd)?;
        }

        let backing = target.path();
        let is_dir = options.contains(CreateOptions::DIRECTORY_FILE);
        let file = if is_dir {
            fs::create_dir(&backing).map_err(|e| ProviderError::from_io("mkdir", path, e))?;
            File::open(&backing).map_err(|e| ProviderError::from_io("open", path, e))?
        } else {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(&backing)
                .map_err(|e| ProviderError::from_io("create", path, e))?
        };

        let mut requested = FileAttributes::from_request(attributes);
        if is_dir {
            requested.insert(FileAttributes::DIRECTORY);
        }
        let stored = StoredInfo {
            attributes: requested,
            creation_time: filetime_from_system(SystemTime::now()),
        };
        if let Err(e) = initialize(&file, stored, security_descriptor, allocation_size, is_dir) {
            drop(file);
            let _ = if is_dir {
                fs::remove_dir(&backing)
            } else {
                fs::remove_file(&backing)
            };
            return Err(e);
        }

        let info = metadata::query(&file)?;
        let delete_on_close = options.contains(CreateOptions::DELETE_ON_CLOSE);
        let handle = self.descriptors.insert(
            FileDescriptor::new(file, backing, is_dir, delete_on_close).with_write_access(!is_dir),
        );
        debug!(path, ?handle, is_dir, "Created");
        Ok(Opened { handle, info })
    }

    /// Opens an existing file or directory.
    pub fn open(
        &self,
        path: &str,
        options: CreateOptions,
        access: AccessMask,
    ) -> ProviderResult<Opened> {
        trace!(path, ?options, ?access, "open");
        self.check_gate("open")?;
        let backing = self.mapper.resolve(path)?;
        let meta =
            fs::metadata(&backing).map_err(|e| ProviderError::from_io("stat", path, e))?;
        let is_dir = meta.is_dir();
        if is_dir && options.contains(CreateOptions::NON_DIRECTORY_FILE) {
            return Err(ProviderError::IsADirectory(path.to_string()));
        }
        if !is_dir && options.contains(CreateOptions::DIRECTORY_FILE) {
            return Err(ProviderError::NotADirectory(path.to_string()));
        }

        let file = if is_dir {
            File::open(&backing).map_err(|e| ProviderError::from_io("open", path, e))?
        } else {
            let readonly = meta.permissions().readonly();
            if readonly && access.wants_write() {
                return Err(ProviderError::AccessDenied(path.to_string()));
            }
            OpenOptions::new()
                .read(true)
                .write(access.wants_write())
                .open(&backing)
                .map_err(|e| ProviderError::from_io("open", path, e))?
        };
        let info = metadata::query(&file)?;
        let delete_on_close = options.contains(CreateOptions::DELETE_ON_CLOSE);
        if delete_on_close && info.attributes().contains(FileAttributes::READONLY) {
            return Err(ProviderError::CannotDelete(path.to_string()));
        }

        let handle = self.descriptors.insert(
            FileDescriptor::new(file, backing, is_dir, delete_on_close)
                .with_write_access(!is_dir && access.wants_write()),
        );
        Ok(Opened { handle, info })
    }

    /// Truncates a file to zero length and updates its attributes.
    ///
    /// With `replace_attributes` the attribute set is replaced (0 meaning
    /// NORMAL); otherwise the given bits are added to the existing set.
    pub fn overwrite(
        &self,
        handle: DescriptorHandle,
        attributes: u32,
        replace_attributes: bool,
        allocation_size: u64,
    ) -> ProviderResult<FileInfo> {
        trace!(?handle, attributes, replace_attributes, "overwrite");
        self.check_gate("overwrite")?;
        let descriptor = self.descriptors.get(handle)?;
        let descriptor = descriptor.lock();
        let target = descriptor.path().display().to_string();
        if descriptor.is_dir() {
            return Err(ProviderError::IsADirectory(target));
        }
        if !descriptor.has_write_access() {
            return Err(ProviderError::AccessDenied(target));
        }
        let file = descriptor.file()?;

        let current = stored_from(&metadata::query(file)?);
        let attributes = if replace_attributes {
            FileAttributes::from_request(attributes)
        } else {
            current.attributes | FileAttributes::from_bits_truncate(attributes)
        };
        // Clear READONLY first so truncation is permitted for non-root callers.
        metadata::store_info(
            file,
            StoredInfo {
                attributes: attributes.difference(FileAttributes::READONLY),
                ..current
            },
        )?;
        if let Err(e) = file.set_len(0) {
            if let Err(restore) = metadata::store_info(file, current) {
                warn!(path = %target, error = %restore, "Failed to restore attributes");
            }
            return Err(ProviderError::from_io("truncate", &target, e));
        }
        if allocation_size > 0 {
            reserve_best_effort(file, allocation_size);
        }
        metadata::store_info(
            file,
            StoredInfo {
                attributes,
                ..current
            },
        )?;
        metadata::query(file)
    }

    /// Called when the last user handle is closed.
    ///
    /// With the DELETE flag, or for a handle opened with delete-on-close, the
    /// native handle is released, the backing object is removed, and the
    /// descriptor is invalidated so later calls fail with `StaleHandle`.
    pub fn cleanup(
        &self,
        handle: DescriptorHandle,
        path: Option<&str>,
        flags: CleanupFlags,
    ) -> ProviderResult<()> {
        trace!(?handle, ?path, ?flags, "cleanup");
        let descriptor = self.descriptors.get(handle)?;
        let delete = flags.contains(CleanupFlags::DELETE) || descriptor.lock().delete_on_close();

        if delete {
            let descriptor = self.descriptors.invalidate(handle)?;
            let mut descriptor = descriptor.lock();
            descriptor.release();
            let backing = descriptor.path().to_path_buf();
            if descriptor.is_detached() {
                debug!(?handle, path = %backing.display(), "Replaced object already unlinked");
                return Ok(());
            }
            let removed = if descriptor.is_dir() {
                fs::remove_dir(&backing)
            } else {
                fs::remove_file(&backing)
            };
            return match removed {
                Ok(()) => {
                    debug!(?handle, path = %backing.display(), "Deleted on cleanup");
                    Ok(())
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => {
                    warn!(path = %backing.display(), error = %e, "Delete on cleanup failed");
                    Err(ProviderError::from_io(
                        "delete",
                        &backing.display().to_string(),
                        e,
                    ))
                }
            };
        }

        let descriptor = descriptor.lock();
        let Ok(file) = descriptor.file() else {
            return Ok(());
        };
        if flags.contains(CleanupFlags::SET_ARCHIVE_BIT) && !descriptor.is_dir() {
            let current = stored_from(&metadata::query(file)?);
            metadata::store_info(
                file,
                StoredInfo {
                    attributes: current.attributes | FileAttributes::ARCHIVE,
                    ..current
                },
            )?;
        }
        let now = filetime::FileTime::now();
        let atime = flags
            .contains(CleanupFlags::SET_LAST_ACCESS_TIME)
            .then_some(now);
        let mtime = flags
            .intersects(CleanupFlags::SET_LAST_WRITE_TIME | CleanupFlags::SET_CHANGE_TIME)
            .then_some(now);
        if atime.is_some() || mtime.is_some() {
            filetime::set_file_handle_times(file, atime, mtime).map_err(|e| {
                ProviderError::from_io("utimens", &descriptor.path().display().to_string(), e)
            })?;
        }
        Ok(())
    }

    /// Releases a descriptor. Called exactly once per successful open.
    pub fn close(&self, handle: DescriptorHandle) -> ProviderResult<()> {
        trace!(?handle, "close");
        if let Some(descriptor) = self.descriptors.remove(handle)? {
            descriptor.lock().release();
        }
        Ok(())
    }

    // ========================================================================
    // Data
    // ========================================================================

    /// Positioned read. Returns the bytes transferred; 0 at end of file.
    pub fn read(
        &self,
        handle: DescriptorHandle,
        buffer: &mut [u8],
        offset: u64,
    ) -> ProviderResult<usize> {
        trace!(?handle, offset, len = buffer.len(), "read");
        self.check_gate("read")?;
        let descriptor = self.descriptors.get(handle)?;
        let descriptor = descriptor.lock();
        if descriptor.is_dir() {
            return Err(ProviderError::IsADirectory(
                descriptor.path().display().to_string(),
            ));
        }
        let file = descriptor.file()?;
        let mut total = 0;
        while total < buffer.len() {
            match file.read_at(&mut buffer[total..], offset + total as u64) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    return Err(ProviderError::from_io(
                        "read",
                        &descriptor.path().display().to_string(),
                        e,
                    ));
                }
            }
        }
        Ok(total)
    }

    /// Positioned write.
    ///
    /// `write_to_end` appends at the current end of file. With
    /// `constrained_io` the write never extends the file: a write starting at
    /// or beyond end of file transfers nothing, and one spanning it is clipped.
    pub fn write(
        &self,
        handle: DescriptorHandle,
        buffer: &[u8],
        offset: u64,
        write_to_end: bool,
        constrained_io: bool,
    ) -> ProviderResult<Written> {
        trace!(?handle, offset, len = buffer.len(), write_to_end, constrained_io, "write");
        self.check_gate("write")?;
        let descriptor = self.descriptors.get(handle)?;
        let descriptor = descriptor.lock();
        let target = descriptor.path().display().to_string();
        if descriptor.is_dir() {
            return Err(ProviderError::IsADirectory(target));
        }
        let file = descriptor.file()?;
        let size = file
            .metadata()
            .map_err(|e| ProviderError::from_io("stat", &target, e))?
            .len();
        let offset = if write_to_end { size } else { offset };

        let data = if constrained_io {
            if offset >= size {
                return Ok(Written {
                    bytes_written: 0,
                    info: metadata::query(file)?,
                });
            }
            let room = usize::try_from(size - offset).unwrap_or(usize::MAX);
            &buffer[..buffer.len().min(room)]
        } else {
            buffer
        };

        file.write_all_at(data, offset).map_err(|e| {
            if e.raw_os_error() == Some(libc::EBADF) {
                ProviderError::AccessDenied(target.clone())
            } else {
                ProviderError::from_io("write", &target, e)
            }
        })?;
        Ok(Written {
            bytes_written: data.len(),
            info: metadata::query(file)?,
        })
    }

    /// Flushes one file. `None` (a volume flush) is a no-op success.
    pub fn flush(&self, handle: Option<DescriptorHandle>) -> ProviderResult<Option<FileInfo>> {
        trace!(?handle, "flush");
        let Some(handle) = handle else {
            return Ok(None);
        };
        self.check_gate("flush")?;
        let descriptor = self.descriptors.get(handle)?;
        let descriptor = descriptor.lock();
        let file = descriptor.file()?;
        file.sync_all().map_err(|e| {
            ProviderError::from_io("fsync", &descriptor.path().display().to_string(), e)
        })?;
        metadata::query(file).map(Some)
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    pub fn get_file_info(&self, handle: DescriptorHandle) -> ProviderResult<FileInfo> {
        trace!(?handle, "get_file_info");
        self.check_gate("get_file_info")?;
        let descriptor = self.descriptors.get(handle)?;
        let descriptor = descriptor.lock();
        metadata::query(descriptor.file()?)
    }

    /// Updates attributes and timestamps.
    pub fn set_basic_info(
        &self,
        handle: DescriptorHandle,
        basic: BasicInfo,
    ) -> ProviderResult<FileInfo> {
        trace!(?handle, ?basic, "set_basic_info");
        self.check_gate("set_basic_info")?;
        let descriptor = self.descriptors.get(handle)?;
        let descriptor = descriptor.lock();
        let file = descriptor.file()?;
        let target = descriptor.path().display().to_string();

        let current = stored_from(&metadata::query(file)?);
        let mut updated = current;
        if basic.file_attributes != INVALID_FILE_ATTRIBUTES {
            updated.attributes = FileAttributes::from_request(basic.file_attributes);
        }
        if basic.creation_time != 0 {
            updated.creation_time = basic.creation_time;
        }
        if updated != current {
            metadata::store_info(file, updated)?;
        }

        let atime = (basic.last_access_time != 0)
            .then(|| metadata::to_native_time(basic.last_access_time));
        let mtime = (basic.last_write_time != 0)
            .then(|| metadata::to_native_time(basic.last_write_time));
        if atime.is_some() || mtime.is_some() {
            // Writing times requires ownership, not write access.
            filetime::set_file_handle_times(file, atime, mtime)
                .map_err(|e| ProviderError::from_io("utimens", &target, e))?;
        }
        metadata::query(file)
    }

    /// Sets the logical size, or with `set_allocation_size` only the reserved
    /// allocation. Allocation changes never alter the logical size.
    pub fn set_file_size(
        &self,
        handle: DescriptorHandle,
        new_size: u64,
        set_allocation_size: bool,
    ) -> ProviderResult<FileInfo> {
        trace!(?handle, new_size, set_allocation_size, "set_file_size");
        self.check_gate("set_file_size")?;
        let descriptor = self.descriptors.get(handle)?;
        let descriptor = descriptor.lock();
        let target = descriptor.path().display().to_string();
        if descriptor.is_dir() {
            return Err(ProviderError::IsADirectory(target));
        }
        let file = descriptor.file()?;
        if set_allocation_size {
            reserve_best_effort(file, new_size);
        } else {
            file.set_len(new_size).map_err(|e| {
                if e.raw_os_error() == Some(libc::EINVAL) || e.raw_os_error() == Some(libc::EBADF) {
                    ProviderError::AccessDenied(target.clone())
                } else {
                    ProviderError::from_io("truncate", &target, e)
                }
            })?;
        }
        metadata::query(file)
    }

    /// Checks whether the object may be deleted. Does not delete it.
    pub fn can_delete(&self, handle: DescriptorHandle, path: &str) -> ProviderResult<()> {
        trace!(?handle, path, "can_delete");
        self.check_gate("can_delete")?;
        let descriptor = self.descriptors.get(handle)?;
        let descriptor = descriptor.lock();
        if descriptor.path() == self.root() {
            return Err(ProviderError::AccessDenied(path.to_string()));
        }
        let info = metadata::query(descriptor.file()?)?;
        if info.attributes().contains(FileAttributes::READONLY) {
            return Err(ProviderError::CannotDelete(path.to_string()));
        }
        if descriptor.is_dir() {
            let mut entries = fs::read_dir(descriptor.path())
                .map_err(|e| ProviderError::from_io("read_dir", path, e))?;
            if entries.next().is_some() {
                return Err(ProviderError::DirectoryNotEmpty(path.to_string()));
            }
        }
        Ok(())
    }

    /// Atomically moves the object behind `handle` to `new_path`.
    ///
    /// An existing target fails with `AlreadyExists` unless
    /// `replace_if_exists` is set; an existing directory is never replaced.
    /// Open descriptors at or below the old path follow the object;
    /// descriptors on a replaced target are detached from its path.
    pub fn rename(
        &self,
        handle: DescriptorHandle,
        path: &str,
        new_path: &str,
        replace_if_exists: bool,
    ) -> ProviderResult<()> {
        trace!(?handle, path, new_path, replace_if_exists, "rename");
        self.check_gate("rename")?;
        let _serial = self.renames.lock();
        let descriptor = self.descriptors.get(handle)?;
        let (source, destination) = {
            let mut guard = descriptor.lock();
            if guard.is_detached() {
                return Err(ProviderError::NotFound(path.to_string()));
            }
            let source = guard.path().to_path_buf();
            if source == self.root() {
                return Err(ProviderError::AccessDenied(path.to_string()));
            }
            let target = self.mapper.resolve_for_create(new_path)?;
            let destination = target.path();

            match target.existing {
                Some(existing) if existing == source => {
                    // Same object, possibly a case-only rename.
                    if existing != destination {
                        fs::rename(&source, &destination)
                            .map_err(|e| ProviderError::from_io("rename", new_path, e))?;
                    }
                }
                Some(existing) => {
                    if !replace_if_exists {
                        return Err(ProviderError::AlreadyExists(new_path.to_string()));
                    }
                    if existing.is_dir() {
                        return Err(ProviderError::AccessDenied(new_path.to_string()));
                    }
                    fs::rename(&source, &existing)
                        .map_err(|e| ProviderError::from_io("rename", new_path, e))?;
                    self.detach_replaced(&descriptor, &existing);
                    if existing != destination {
                        fs::rename(&existing, &destination)
                            .map_err(|e| ProviderError::from_io("rename", new_path, e))?;
                    }
                }
                None if replace_if_exists => {
                    fs::rename(&source, &destination)
                        .map_err(|e| ProviderError::from_io("rename", new_path, e))?;
                }
                None => native::rename_noreplace(&source, &destination)
                    .map_err(|e| ProviderError::from_io("rename", new_path, e))?,
            }
            guard.set_path(destination.clone());
            (source, destination)
        };

        for other in self.descriptors.live() {
            if Arc::ptr_eq(&other, &descriptor) {
                continue;
            }
            let mut other = other.lock();
            if let Some(moved) = rebase(other.path(), &source, &destination) {
                other.set_path(moved);
            }
        }
        debug!(from = %source.display(), to = %destination.display(), "Renamed");
        Ok(())
    }

    /// Detaches every other descriptor still open on the replaced `existing`.
    fn detach_replaced(&self, renamed: &DescriptorRef, existing: &Path) {
        for other in self.descriptors.live() {
            if Arc::ptr_eq(&other, renamed) {
                continue;
            }
            let mut other = other.lock();
            if other.path() == existing {
                other.detach();
            }
        }
    }

    // ========================================================================
    // Security
    // ========================================================================

    /// Returns the security descriptor size, copying it into `descriptor`
    /// when supplied.
    pub fn get_security(
        &self,
        handle: DescriptorHandle,
        descriptor: Option<&mut [u8]>,
    ) -> ProviderResult<usize> {
        trace!(?handle, "get_security");
        self.check_gate("get_security")?;
        let fd = self.descriptors.get(handle)?;
        let fd = fd.lock();
        let sd = metadata::load_security(fd.file()?);
        security::copy_to_buffer(&sd, descriptor)
    }

    /// Replaces the sections of the stored descriptor selected by `info`.
    pub fn set_security(
        &self,
        handle: DescriptorHandle,
        info: SecurityInformation,
        modification: &[u8],
    ) -> ProviderResult<()> {
        trace!(?handle, ?info, "set_security");
        self.check_gate("set_security")?;
        let modification = SecurityDescriptor::parse(modification)?;
        let fd = self.descriptors.get(handle)?;
        let fd = fd.lock();
        let file = fd.file()?;
        let current = SecurityDescriptor::parse(&metadata::load_security(file))
            .unwrap_or_default();
        let merged = current.merge(info, &modification);
        metadata::store_security(file, &merged.to_bytes())
    }

    // ========================================================================
    // Enumeration
    // ========================================================================

    /// Advances the descriptor's enumeration cursor by one entry.
    ///
    /// The first call (no cursor yet) opens an enumeration with `pattern`,
    /// positioned after `marker` when given. `Ok(None)` means no more files;
    /// the cursor is dropped and the next call starts over.
    pub fn read_directory_entry(
        &self,
        handle: DescriptorHandle,
        pattern: Option<&str>,
        marker: Option<&str>,
    ) -> ProviderResult<Option<DirInfo>> {
        trace!(?handle, ?pattern, ?marker, "read_directory_entry");
        self.check_gate("read_directory")?;
        let descriptor = self.descriptors.get(handle)?;
        let mut descriptor = descriptor.lock();
        if !descriptor.is_dir() {
            return Err(ProviderError::NotADirectory(
                descriptor.path().display().to_string(),
            ));
        }
        if descriptor.cursor.is_none() {
            let cursor = open_cursor(descriptor.path(), pattern, marker)?;
            descriptor.cursor = Some(cursor);
        }
        let next = match descriptor.cursor.as_mut() {
            Some(cursor) => cursor.next_entry()?,
            None => None,
        };
        if next.is_none() {
            descriptor.cursor = None;
        }
        Ok(next)
    }

    /// Lists every matching entry after `marker`, restarting the cursor.
    pub fn read_directory(
        &self,
        handle: DescriptorHandle,
        pattern: Option<&str>,
        marker: Option<&str>,
    ) -> ProviderResult<Vec<DirInfo>> {
        trace!(?handle, ?pattern, ?marker, "read_directory");
        self.check_gate("read_directory")?;
        let descriptor = self.descriptors.get(handle)?;
        let mut descriptor = descriptor.lock();
        if !descriptor.is_dir() {
            return Err(ProviderError::NotADirectory(
                descriptor.path().display().to_string(),
            ));
        }
        descriptor.cursor = None;
        let mut cursor = open_cursor(descriptor.path(), pattern, marker)?;
        let mut entries = Vec::new();
        while let Some(entry) = cursor.next_entry()? {
            entries.push(entry);
        }
        Ok(entries)
    }
}

fn open_cursor(
    dir: &Path,
    pattern: Option<&str>,
    marker: Option<&str>,
) -> ProviderResult<DirectoryCursor> {
    let pattern = pattern.map_or_else(|| Ok(NamePattern::all()), NamePattern::new)?;
    match marker {
        Some(marker) if !marker.is_empty() => DirectoryCursor::open_after(dir, pattern, marker),
        _ => DirectoryCursor::open(dir, pattern),
    }
}

/// Persists the metadata of a freshly created object.
fn initialize(
    file: &File,
    stored: StoredInfo,
    security_descriptor: Option<&[u8]>,
    allocation_size: u64,
    is_dir: bool,
) -> ProviderResult<()> {
    if let Some(sd) = security_descriptor {
        metadata::store_security(file, sd)?;
    }
    if !is_dir && allocation_size > 0 {
        reserve_best_effort(file, allocation_size);
    }
    metadata::store_info(file, stored)
}

fn stored_from(info: &FileInfo) -> StoredInfo {
    StoredInfo {
        attributes: info.attributes().persistent(),
        creation_time: info.creation_time,
    }
}

fn reserve_best_effort(file: &File, size: u64) {
    if let Err(e) = native::reserve(file, size) {
        debug!(size, error = %e, "Allocation reservation not applied");
    }
}

/// Maps `path` from under `from` to the same place under `to`.
fn rebase(path: &Path, from: &Path, to: &Path) -> Option<PathBuf> {
    let rest = path.strip_prefix(from).ok()?;
    Some(if rest.as_os_str().is_empty() {
        to.to_path_buf()
    } else {
        to.join(rest)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rebase() {
        let from = Path::new("/r/a");
        let to = Path::new("/r/b");
        assert_eq!(rebase(Path::new("/r/a"), from, to), Some(PathBuf::from("/r/b")));
        assert_eq!(
            rebase(Path::new("/r/a/x/y"), from, to),
            Some(PathBuf::from("/r/b/x/y"))
        );
        assert_eq!(rebase(Path::new("/r/ab"), from, to), None);
    }

    #[test]
    fn test_basic_info_default_changes_nothing() {
        let basic = BasicInfo::default();
        assert_eq!(basic.file_attributes, INVALID_FILE_ATTRIBUTES);
        assert_eq!(basic.creation_time, 0);
        assert_eq!(basic.last_write_time, 0);
    }
}
