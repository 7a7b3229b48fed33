//! Shared fixture for provider integration tests.

// Not all tests use all helpers
#![allow(dead_code)]

use std::fs::File;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use vdu_provider::{
    AccessMask, CleanupFlags, CreateOptions, DescriptorHandle, FileSystemProvider, ProviderConfig,
};

/// A provider over a fresh temporary backing directory.
pub struct Fixture {
    pub provider: FileSystemProvider,
    dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(ProviderConfig::default())
    }

    pub fn with_config(config: ProviderConfig) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let provider = FileSystemProvider::new(dir.path(), config).expect("provider");
        Self { provider, dir }
    }

    /// Backing path for a virtual path with `\` separators.
    pub fn backing(&self, virtual_path: &str) -> PathBuf {
        let mut path = self.provider.root().to_path_buf();
        for part in virtual_path.split('\\').filter(|p| !p.is_empty()) {
            path.push(part);
        }
        path
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Creates a file, writes `content`, and closes it.
    pub fn put(&self, path: &str, content: &[u8]) {
        let h = self.create_file(path);
        self.provider.write(h, content, 0, false, false).expect("write");
        self.close(h, path);
    }

    pub fn create_file(&self, path: &str) -> DescriptorHandle {
        self.provider
            .create(
                path,
                CreateOptions::empty(),
                AccessMask::GENERIC_READ | AccessMask::GENERIC_WRITE,
                0,
                None,
                0,
            )
            .expect("create file")
            .handle
    }

    pub fn create_dir(&self, path: &str) -> DescriptorHandle {
        self.provider
            .create(
                path,
                CreateOptions::DIRECTORY_FILE,
                AccessMask::GENERIC_READ,
                0,
                None,
                0,
            )
            .expect("create dir")
            .handle
    }

    pub fn mkdir(&self, path: &str) {
        let h = self.create_dir(path);
        self.close(h, path);
    }

    pub fn open_rw(&self, path: &str) -> DescriptorHandle {
        self.provider
            .open(
                path,
                CreateOptions::empty(),
                AccessMask::GENERIC_READ | AccessMask::GENERIC_WRITE,
            )
            .expect("open")
            .handle
    }

    pub fn open_ro(&self, path: &str) -> DescriptorHandle {
        self.provider
            .open(path, CreateOptions::empty(), AccessMask::GENERIC_READ)
            .expect("open")
            .handle
    }

    pub fn close(&self, handle: DescriptorHandle, path: &str) {
        self.provider
            .cleanup(handle, Some(path), CleanupFlags::empty())
            .expect("cleanup");
        self.provider.close(handle).expect("close");
    }

    pub fn read_all(&self, path: &str) -> Vec<u8> {
        let h = self.open_ro(path);
        let size = self.provider.get_file_info(h).expect("info").file_size;
        let mut buf = vec![0u8; usize::try_from(size).unwrap()];
        let n = self.provider.read(h, &mut buf, 0).expect("read");
        buf.truncate(n);
        self.close(h, path);
        buf
    }

    /// Whether the backing filesystem keeps NT metadata in extended attributes.
    pub fn persists_metadata(&self) -> bool {
        let probe = File::open(self.provider.root()).expect("open root");
        vdu_provider::metadata::supports_xattrs(&probe)
    }
}
