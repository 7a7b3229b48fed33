//! Test mount harness for FUSE integration tests.
//!
//! Provides `TestMount`, which hosts a provider over a temporary cache root
//! and mounts it on a temporary directory through the FUSE backend.

// Not all tests use all TestMount methods
#![allow(dead_code)]

use std::fs::{self, File, Metadata};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use vdu_mount::{FuseBackend, FuseOptions, MountPoint, VolumeHost};
use vdu_provider::ProviderConfig;

/// A mounted volume over a fresh cache root.
///
/// Unmounts on drop, before the temporary directories go away.
pub struct TestMount {
    host: VolumeHost,
    /// Path where the volume is mounted.
    pub mount_path: PathBuf,
    _temp: TempDir,
}

impl TestMount {
    pub fn new() -> Result<Self, String> {
        let temp = TempDir::new().map_err(|e| format!("Failed to create temp dir: {e}"))?;
        let cache = temp.path().join("cache");
        let mount_path = temp.path().join("mnt");
        fs::create_dir(&mount_path).map_err(|e| format!("Failed to create mount point: {e}"))?;

        // Zero TTL so every stat reaches the provider.
        let options = FuseOptions::default()
            .attr_ttl(Duration::ZERO)
            .volume_name("vdu-test");
        let mut host = VolumeHost::new(
            &cache,
            ProviderConfig::default(),
            Box::new(FuseBackend::new(options)),
        )
        .map_err(|e| format!("Failed to create host: {e}"))?;
        host.start(MountPoint::Path(mount_path.clone()))
            .map_err(|e| format!("Failed to mount: {e}"))?;

        Ok(Self {
            host,
            mount_path,
            _temp: temp,
        })
    }

    pub fn host(&self) -> &VolumeHost {
        &self.host
    }

    /// Backing path in the cache root for a mount-relative path.
    pub fn backing(&self, relative: &str) -> PathBuf {
        self.host.cache_root().join(relative.trim_start_matches('/'))
    }

    /// Build a full path from a relative path.
    pub fn path(&self, relative: &str) -> PathBuf {
        self.mount_path.join(relative.trim_start_matches('/'))
    }

    pub fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        let mut content = Vec::new();
        File::open(self.path(path))?.read_to_end(&mut content)?;
        Ok(content)
    }

    /// Write content to a file (creates or overwrites).
    pub fn write(&self, path: &str, content: &[u8]) -> io::Result<()> {
        let mut file = File::create(self.path(path))?;
        file.write_all(content)?;
        file.sync_all()?;
        Ok(())
    }

    pub fn append(&self, path: &str, content: &[u8]) -> io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.path(path))?;
        file.write_all(content)?;
        file.sync_all()?;
        Ok(())
    }

    pub fn mkdir(&self, path: &str) -> io::Result<()> {
        fs::create_dir(self.path(path))
    }

    pub fn remove(&self, path: &str) -> io::Result<()> {
        fs::remove_file(self.path(path))
    }

    pub fn rmdir(&self, path: &str) -> io::Result<()> {
        fs::remove_dir(self.path(path))
    }

    pub fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        fs::rename(self.path(from), self.path(to))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.path(path).exists()
    }

    pub fn metadata(&self, path: &str) -> io::Result<Metadata> {
        fs::metadata(self.path(path))
    }

    /// List directory entries (names only), sorted.
    pub fn list(&self, path: &str) -> io::Result<Vec<String>> {
        let mut names: Vec<String> = fs::read_dir(self.path(path))?
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn truncate(&self, path: &str, size: u64) -> io::Result<()> {
        let file = fs::OpenOptions::new().write(true).open(self.path(path))?;
        file.set_len(size)
    }
}

/// Check if FUSE is available on this system.
pub fn fuse_available() -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new("/dev/fuse").exists()
    }
    #[cfg(target_os = "macos")]
    {
        Path::new("/Library/Filesystems/macfuse.fs").exists()
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        false
    }
}

/// Skip test if FUSE is not available.
#[macro_export]
macro_rules! skip_if_no_fuse {
    () => {
        if !$crate::common::harness::fuse_available() {
            eprintln!("Skipping test: FUSE not available on this system");
            return;
        }
    };
}

/// Skip test if mounting fails (common in CI environments).
#[macro_export]
macro_rules! require_mount {
    ($mount_result:expr) => {
        match $mount_result {
            Ok(m) => m,
            Err(e) => {
                eprintln!("Skipping test: {}", e);
                return;
            }
        }
    };
}
