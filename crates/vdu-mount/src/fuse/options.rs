//! Options for the FUSE backend.

use std::path::PathBuf;
use std::time::Duration;

/// Default kernel attribute cache lifetime.
///
/// Kept short: the backing directory can change underneath the mount.
pub const DEFAULT_ATTR_TTL: Duration = Duration::from_secs(1);

/// Configuration options for FUSE mounts.
#[derive(Debug, Clone)]
pub struct FuseOptions {
    /// Directory under which drive letters are mounted (`X:` → `<root>/X`).
    pub drive_root: PathBuf,

    /// Time-to-live for attributes and entries handed to the kernel.
    pub attr_ttl: Duration,

    /// Volume name shown by the OS (the `fsname` mount option and, on
    /// macOS, the Finder volume name).
    pub volume_name: String,

    /// How long to wait for the mount to become ready.
    pub mount_timeout: Duration,

    /// Polling interval while waiting for the mount.
    pub poll_interval: Duration,
}

impl Default for FuseOptions {
    fn default() -> Self {
        Self {
            drive_root: std::env::temp_dir().join("vdu-drives"),
            attr_ttl: DEFAULT_ATTR_TTL,
            volume_name: "VDU".to_string(),
            mount_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl FuseOptions {
    #[must_use]
    pub fn drive_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.drive_root = root.into();
        self
    }

    #[must_use]
    pub fn attr_ttl(mut self, ttl: Duration) -> Self {
        self.attr_ttl = ttl;
        self
    }

    #[must_use]
    pub fn volume_name(mut self, name: impl Into<String>) -> Self {
        self.volume_name = name.into();
        self
    }

    /// Sets the mount readiness timeout and polling interval.
    #[must_use]
    pub fn timeouts(mut self, mount_timeout: Duration, poll_interval: Duration) -> Self {
        self.mount_timeout = mount_timeout;
        self.poll_interval = poll_interval;
        self
    }
}
