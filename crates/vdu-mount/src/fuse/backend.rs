//! FUSE implementation of [`MountBackend`].

use crate::backend::{MountBackend, MountHandle, MountPoint};
use crate::error::{MountError, MountResult};
use crate::fuse::filesystem::VduFs;
use crate::fuse::options::FuseOptions;
use fuser::{BackgroundSession, MountOption};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use vdu_provider::FileSystemProvider;

/// Timeout for a graceful `session.join()` when the handle is dropped.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a FUSE-mounted volume. Dropping it unmounts.
pub struct FuseMountHandle {
    session: Option<BackgroundSession>,
    mount_point: PathBuf,
}

impl MountHandle for FuseMountHandle {
    fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    fn unmount(mut self: Box<Self>) -> MountResult<()> {
        info!(mount_point = %self.mount_point.display(), "Unmounting FUSE filesystem");
        if let Some(session) = self.session.take() {
            // Blocks until open files are released by the kernel.
            session.join();
        }
        info!(mount_point = %self.mount_point.display(), "FUSE unmount successful");
        Ok(())
    }
}

impl Drop for FuseMountHandle {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        debug!(mount_point = %self.mount_point.display(), "Unmounting FUSE filesystem on drop");
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            session.join();
            let _ = tx.send(());
        });
        if rx.recv_timeout(JOIN_TIMEOUT).is_err() {
            warn!(
                mount_point = %self.mount_point.display(),
                "session.join() timed out after {:?}", JOIN_TIMEOUT
            );
        }
    }
}

/// Mounts volumes through macFUSE (macOS) or libfuse (Linux).
#[derive(Debug, Clone, Default)]
pub struct FuseBackend {
    options: FuseOptions,
}

impl FuseBackend {
    pub fn new(options: FuseOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &FuseOptions {
        &self.options
    }

    fn mount_options(&self, target: &MountPoint) -> Vec<MountOption> {
        #[allow(unused_mut)]
        let mut options = vec![
            MountOption::FSName(format!("vdu:{}", target.label())),
            MountOption::Subtype("vdu".to_string()),
            MountOption::AutoUnmount,
            MountOption::DefaultPermissions,
        ];
        #[cfg(target_os = "macos")]
        options.push(MountOption::CUSTOM(format!(
            "volname={}",
            self.options.volume_name
        )));
        options
    }

    /// Polls until the mount point's device differs from its parent's.
    fn wait_for_mount(&self, mount_point: &Path) -> MountResult<()> {
        let deadline = Instant::now() + self.options.mount_timeout;
        let parent = mount_point.parent().unwrap_or(Path::new("/"));

        while Instant::now() < deadline {
            if let (Ok(path_meta), Ok(parent_meta)) =
                (std::fs::metadata(mount_point), std::fs::metadata(parent))
                && path_meta.dev() != parent_meta.dev()
            {
                debug!(
                    mount_point = %mount_point.display(),
                    dev = path_meta.dev(),
                    parent_dev = parent_meta.dev(),
                    "FUSE mount confirmed active"
                );
                return Ok(());
            }
            std::thread::sleep(self.options.poll_interval);
        }

        Err(MountError::Mount(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!(
                "FUSE mount did not become ready within {:?}",
                self.options.mount_timeout
            ),
        )))
    }

    /// Runs `spawn_mount2` on a helper thread so a blocked mount syscall
    /// (e.g. a stale mount at the target) cannot hang the caller.
    fn spawn_mount_with_timeout(
        &self,
        fs: VduFs,
        mount_point: &Path,
        options: Vec<MountOption>,
    ) -> MountResult<BackgroundSession> {
        let mount_point = mount_point.to_path_buf();
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let result = fuser::spawn_mount2(fs, &mount_point, &options);
            let _ = tx.send(result);
        });

        match rx.recv_timeout(self.options.mount_timeout) {
            Ok(Ok(session)) => Ok(session),
            Ok(Err(e)) => Err(MountError::Mount(e)),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(MountError::Mount(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Mount operation timed out - the mount point may be on a stale FUSE mount",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(MountError::Mount(
                std::io::Error::other("Mount thread terminated unexpectedly"),
            )),
        }
    }
}

impl MountBackend for FuseBackend {
    fn name(&self) -> &'static str {
        "FUSE"
    }

    fn is_available(&self) -> bool {
        #[cfg(target_os = "macos")]
        {
            Path::new("/Library/Filesystems/macfuse.fs").exists()
        }
        #[cfg(target_os = "linux")]
        {
            Path::new("/dev/fuse").exists()
        }
    }

    fn unavailable_reason(&self) -> Option<String> {
        if self.is_available() {
            return None;
        }
        #[cfg(target_os = "macos")]
        {
            Some("macFUSE is not installed. Download it from https://osxfuse.github.io/".to_string())
        }
        #[cfg(target_os = "linux")]
        {
            Some("FUSE is not available. Ensure the fuse kernel module is loaded.".to_string())
        }
    }

    fn mount(
        &self,
        provider: Arc<FileSystemProvider>,
        target: &MountPoint,
    ) -> MountResult<Box<dyn MountHandle>> {
        let mount_point = target.resolve(&self.options.drive_root);
        info!(
            target = %target,
            mount_point = %mount_point.display(),
            "Starting FUSE mount"
        );
        if mount_point.exists() && !mount_point.is_dir() {
            return Err(MountError::InvalidMountPoint(format!(
                "{} is not a directory",
                mount_point.display()
            )));
        }
        std::fs::create_dir_all(&mount_point)?;

        let fs = VduFs::new(provider, self.options.attr_ttl);
        let session =
            self.spawn_mount_with_timeout(fs, &mount_point, self.mount_options(target))?;
        let handle = FuseMountHandle {
            session: Some(session),
            mount_point,
        };
        // Dropping the handle on failure unmounts the half-ready session.
        self.wait_for_mount(&handle.mount_point)?;
        Ok(Box::new(handle))
    }
}
