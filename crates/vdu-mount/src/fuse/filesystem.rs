//! FUSE adapter over the filesystem provider.
//!
//! Each kernel request is translated into the provider callback sequence an
//! NT filesystem framework would issue: path lookups open a transient
//! descriptor, read its info and close it; `unlink`/`rmdir` run
//! `can_delete` and a delete-flagged `cleanup`; open file handles carry the
//! provider's raw descriptor handle as the FUSE `fh`.
//!
//! | Operation | Provider calls |
//! |-----------|----------------|
//! | lookup/getattr | open, cleanup, close |
//! | setattr | set_file_size, set_basic_info |
//! | open/opendir | open (overwrite on O_TRUNC) |
//! | create/mkdir | create |
//! | read/write | read, write |
//! | flush/fsync | flush |
//! | release/releasedir | cleanup, close |
//! | readdir | read_directory |
//! | unlink/rmdir | open, can_delete, cleanup(DELETE), close |
//! | rename | open, rename, cleanup, close |
//! | statfs | get_volume_info |

use crate::fuse::inode::{InodeTable, ROOT_INODE, child_path};
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
    TimeOrNow,
};
use libc::c_int;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, trace};
use vdu_provider::{
    AccessMask, BasicInfo, CleanupFlags, CreateOptions, DescriptorHandle, FileAttributes,
    FileInfo, FileSystemProvider, ProviderError, ProviderResult, filetime_from_system,
    system_from_filetime,
};

/// Block size for filesystem statistics.
const BLOCK_SIZE: u32 = 4096;

/// Default file permissions (rw-r--r--).
const DEFAULT_FILE_PERM: u16 = 0o644;

/// Default directory permissions (rwxr-xr-x).
const DEFAULT_DIR_PERM: u16 = 0o755;

/// `renameat2` flags, identical on every platform fuser forwards them from.
const RENAME_NOREPLACE: u32 = 1;
const RENAME_EXCHANGE: u32 = 2;

/// FUSE filesystem exposing a [`FileSystemProvider`].
pub struct VduFs {
    provider: Arc<FileSystemProvider>,
    inodes: InodeTable,
    attr_ttl: Duration,
    uid: u32,
    gid: u32,
}

impl VduFs {
    pub fn new(provider: Arc<FileSystemProvider>, attr_ttl: Duration) -> Self {
        // SAFETY: getuid/getgid cannot fail and have no preconditions.
        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };
        Self {
            provider,
            inodes: InodeTable::new(),
            attr_ttl,
            uid,
            gid,
        }
    }

    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    fn path_of(&self, ino: u64) -> Result<String, c_int> {
        self.inodes.path(ino).ok_or(libc::ENOENT)
    }

    fn child_of(&self, parent: u64, name: &OsStr) -> Result<String, c_int> {
        let name = name.to_str().ok_or(libc::EINVAL)?;
        Ok(child_path(&self.path_of(parent)?, name))
    }

    /// Queries info for `path` through a transient descriptor.
    fn stat(&self, path: &str) -> ProviderResult<FileInfo> {
        let opened = self
            .provider
            .open(path, CreateOptions::empty(), AccessMask::FILE_READ_ATTRIBUTES)?;
        self.finish(opened.handle, path, CleanupFlags::empty())?;
        Ok(opened.info)
    }

    /// Cleanup then close. Close runs even when cleanup fails.
    fn finish(
        &self,
        handle: DescriptorHandle,
        path: &str,
        flags: CleanupFlags,
    ) -> ProviderResult<()> {
        let cleaned = self.provider.cleanup(handle, Some(path), flags);
        let closed = self.provider.close(handle);
        cleaned.and(closed)
    }

    /// Opens `path`, checks it may be deleted, and deletes it on cleanup.
    fn delete(&self, path: &str, options: CreateOptions) -> ProviderResult<()> {
        let opened = self
            .provider
            .open(path, options, AccessMask::DELETE | AccessMask::GENERIC_READ)?;
        if let Err(e) = self.provider.can_delete(opened.handle, path) {
            let _ = self.finish(opened.handle, path, CleanupFlags::empty());
            return Err(e);
        }
        self.finish(opened.handle, path, CleanupFlags::DELETE)
    }

    fn make_attr(&self, ino: u64, info: &FileInfo) -> FileAttr {
        let is_dir = info.is_directory();
        let mut perm = if is_dir {
            DEFAULT_DIR_PERM
        } else {
            DEFAULT_FILE_PERM
        };
        if info.attributes().contains(FileAttributes::READONLY) {
            perm &= !0o222;
        }
        FileAttr {
            ino,
            size: info.file_size,
            blocks: info.allocation_size / 512,
            atime: system_from_filetime(info.last_access_time),
            mtime: system_from_filetime(info.last_write_time),
            ctime: system_from_filetime(info.change_time),
            crtime: system_from_filetime(info.creation_time),
            kind: if is_dir {
                FileType::Directory
            } else {
                FileType::RegularFile
            },
            perm,
            nlink: if is_dir { 2 } else { 1 },
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    fn set_attributes(
        &self,
        handle: DescriptorHandle,
        mode: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
    ) -> ProviderResult<FileInfo> {
        if let Some(size) = size {
            self.provider.set_file_size(handle, size, false)?;
        }
        let mut basic = BasicInfo::default();
        if let Some(mode) = mode {
            let mut attributes = self.provider.get_file_info(handle)?.attributes().persistent();
            attributes.set(FileAttributes::READONLY, mode & 0o200 == 0);
            basic.file_attributes = attributes.bits();
        }
        basic.last_access_time = atime.map_or(0, to_filetime);
        basic.last_write_time = mtime.map_or(0, to_filetime);
        self.provider.set_basic_info(handle, basic)
    }
}

fn to_filetime(time: TimeOrNow) -> u64 {
    match time {
        TimeOrNow::SpecificTime(t) => filetime_from_system(t),
        TimeOrNow::Now => filetime_from_system(SystemTime::now()),
    }
}

fn errno(e: &ProviderError) -> c_int {
    debug!(error = %e, "Request failed");
    e.to_errno()
}

fn access_for(flags: i32) -> AccessMask {
    if flags & libc::O_ACCMODE == libc::O_RDONLY {
        AccessMask::GENERIC_READ
    } else {
        AccessMask::GENERIC_READ | AccessMask::GENERIC_WRITE
    }
}

impl Filesystem for VduFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        info!(root = %self.provider.root().display(), "FUSE filesystem initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        info!(open_handles = self.provider.open_handles(), "FUSE filesystem destroyed");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = match self.child_of(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        trace!(parent, path, "lookup");
        match self.stat(&path) {
            Ok(info) => {
                let ino = self.inodes.get_or_insert(&path);
                reply.entry(&self.attr_ttl, &self.make_attr(ino, &info), 0);
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        trace!(inode = ino, nlookup, "forget");
        self.inodes.forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, fh: Option<u64>, reply: ReplyAttr) {
        trace!(inode = ino, ?fh, "getattr");
        let info = match fh {
            Some(fh) => self.provider.get_file_info(DescriptorHandle::from_raw(fh)),
            None => match self.path_of(ino) {
                Ok(path) => self.stat(&path),
                Err(e) => return reply.error(e),
            },
        };
        match info {
            Ok(info) => reply.attr(&self.attr_ttl, &self.make_attr(ino, &info)),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        trace!(inode = ino, ?mode, ?size, ?fh, "setattr");
        // Ownership is not tracked; uid/gid changes are ignored like on vfat.
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };

        let result = if let Some(fh) = fh {
            self.set_attributes(DescriptorHandle::from_raw(fh), mode, size, atime, mtime)
        } else {
            let access = if size.is_some() {
                AccessMask::GENERIC_READ | AccessMask::GENERIC_WRITE
            } else {
                AccessMask::FILE_WRITE_ATTRIBUTES
            };
            match self.provider.open(&path, CreateOptions::empty(), access) {
                Ok(opened) => {
                    let result = self.set_attributes(opened.handle, mode, size, atime, mtime);
                    let _ = self.finish(opened.handle, &path, CleanupFlags::empty());
                    result
                }
                Err(e) => Err(e),
            }
        };
        match result {
            Ok(info) => reply.attr(&self.attr_ttl, &self.make_attr(ino, &info)),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        trace!(inode = ino, path, flags, "open");
        let opened = match self.provider.open(
            &path,
            CreateOptions::NON_DIRECTORY_FILE,
            access_for(flags),
        ) {
            Ok(o) => o,
            Err(e) => return reply.error(errno(&e)),
        };
        if flags & libc::O_TRUNC != 0
            && let Err(e) = self.provider.overwrite(opened.handle, 0, false, 0)
        {
            let _ = self.finish(opened.handle, &path, CleanupFlags::empty());
            return reply.error(errno(&e));
        }
        reply.opened(opened.handle.into_raw(), 0);
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let path = match self.child_of(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        trace!(parent, path, mode, flags, "create");
        let attributes = if mode & !umask & 0o222 == 0 {
            FileAttributes::READONLY.bits()
        } else {
            0
        };
        match self.provider.create(
            &path,
            CreateOptions::NON_DIRECTORY_FILE,
            access_for(flags),
            attributes,
            None,
            0,
        ) {
            Ok(created) => {
                let ino = self.inodes.get_or_insert(&path);
                let attr = self.make_attr(ino, &created.info);
                reply.created(&self.attr_ttl, &attr, 0, created.handle.into_raw(), 0);
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!(inode = ino, fh, offset, size, "read");
        let Ok(offset) = u64::try_from(offset) else {
            return reply.error(libc::EINVAL);
        };
        let mut buffer = vec![0u8; size as usize];
        match self
            .provider
            .read(DescriptorHandle::from_raw(fh), &mut buffer, offset)
        {
            Ok(n) => reply.data(&buffer[..n]),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        trace!(inode = ino, fh, offset, len = data.len(), "write");
        let Ok(offset) = u64::try_from(offset) else {
            return reply.error(libc::EINVAL);
        };
        let append = flags & libc::O_APPEND != 0;
        match self
            .provider
            .write(DescriptorHandle::from_raw(fh), data, offset, append, false)
        {
            Ok(written) => reply.written(u32::try_from(written.bytes_written).unwrap_or(u32::MAX)),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        trace!(inode = ino, fh, "flush");
        match self.provider.flush(Some(DescriptorHandle::from_raw(fh))) {
            Ok(_) => reply.ok(),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        trace!(inode = ino, fh, "fsync");
        match self.provider.flush(Some(DescriptorHandle::from_raw(fh))) {
            Ok(_) => reply.ok(),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        trace!(inode = ino, fh, "release");
        let path = self.inodes.path(ino);
        let handle = DescriptorHandle::from_raw(fh);
        let cleaned = self
            .provider
            .cleanup(handle, path.as_deref(), CleanupFlags::empty());
        match self.provider.close(handle).and(cleaned) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        trace!(inode = ino, path, "opendir");
        match self
            .provider
            .open(&path, CreateOptions::DIRECTORY_FILE, AccessMask::GENERIC_READ)
        {
            Ok(opened) => reply.opened(opened.handle.into_raw(), 0),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace!(inode = ino, fh, offset, "readdir");
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        let entries = match self
            .provider
            .read_directory(DescriptorHandle::from_raw(fh), None, None)
        {
            Ok(entries) => entries,
            Err(e) => return reply.error(errno(&e)),
        };

        let parent = if ino == ROOT_INODE {
            ROOT_INODE
        } else {
            self.inodes.parent_inode(&path)
        };
        let dots = [
            (ino, FileType::Directory, ".".to_string()),
            (parent, FileType::Directory, "..".to_string()),
        ];
        let listed = entries.into_iter().map(|entry| {
            let child = self
                .inodes
                .get_or_insert_no_lookup_inc(&child_path(&path, &entry.name));
            let kind = if entry.info.is_directory() {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            (child, kind, entry.name)
        });

        let skip = usize::try_from(offset).unwrap_or(0);
        for (index, (child, kind, name)) in dots.into_iter().chain(listed).enumerate().skip(skip) {
            let next_offset = i64::try_from(index + 1).unwrap_or(i64::MAX);
            if reply.add(child, next_offset, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        trace!(inode = ino, fh, "releasedir");
        let path = self.inodes.path(ino);
        let handle = DescriptorHandle::from_raw(fh);
        let cleaned = self
            .provider
            .cleanup(handle, path.as_deref(), CleanupFlags::empty());
        match self.provider.close(handle).and(cleaned) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let path = match self.child_of(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        trace!(parent, path, "mkdir");
        let created = match self.provider.create(
            &path,
            CreateOptions::DIRECTORY_FILE,
            AccessMask::GENERIC_READ,
            0,
            None,
            0,
        ) {
            Ok(c) => c,
            Err(e) => return reply.error(errno(&e)),
        };
        if let Err(e) = self.finish(created.handle, &path, CleanupFlags::empty()) {
            return reply.error(errno(&e));
        }
        let ino = self.inodes.get_or_insert(&path);
        reply.entry(&self.attr_ttl, &self.make_attr(ino, &created.info), 0);
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_of(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        trace!(parent, path, "unlink");
        match self.delete(&path, CreateOptions::NON_DIRECTORY_FILE) {
            Ok(()) => {
                self.inodes.invalidate_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_of(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e),
        };
        trace!(parent, path, "rmdir");
        match self.delete(&path, CreateOptions::DIRECTORY_FILE) {
            Ok(()) => {
                self.inodes.invalidate_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        let (from, to) = match (self.child_of(parent, name), self.child_of(newparent, newname)) {
            (Ok(from), Ok(to)) => (from, to),
            (Err(e), _) | (_, Err(e)) => return reply.error(e),
        };
        trace!(from, to, flags, "rename");
        if flags & RENAME_EXCHANGE != 0 {
            return reply.error(libc::EINVAL);
        }
        let replace = flags & RENAME_NOREPLACE == 0;

        let opened = match self
            .provider
            .open(&from, CreateOptions::empty(), AccessMask::DELETE)
        {
            Ok(o) => o,
            Err(e) => return reply.error(errno(&e)),
        };
        let renamed = self.provider.rename(opened.handle, &from, &to, replace);
        let current = if renamed.is_ok() { &to } else { &from };
        let _ = self.finish(opened.handle, current, CleanupFlags::empty());
        match renamed {
            Ok(()) => {
                self.inodes.rename(&from, &to);
                reply.ok();
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let volume = self.provider.get_volume_info();
        let block = u64::from(BLOCK_SIZE);
        let blocks = volume.total_size.div_ceil(block);
        let free = volume.free_size.div_ceil(block);

        // Inode counts come from the backing filesystem.
        match nix::sys::statvfs::statvfs(self.provider.root()) {
            Ok(stat) => {
                // name_max from statvfs is typically 255, which fits in u32
                #[allow(clippy::cast_possible_truncation)]
                let name_max = stat.name_max() as u32;
                reply.statfs(
                    blocks,
                    free,
                    free,
                    u64::from(stat.files()),
                    u64::from(stat.files_free()),
                    BLOCK_SIZE,
                    name_max,
                    BLOCK_SIZE,
                );
            }
            Err(e) => {
                debug!(error = %e, "Failed to get statfs, using defaults");
                reply.statfs(blocks, free, free, 0, 0, BLOCK_SIZE, 255, BLOCK_SIZE);
            }
        }
    }
}
