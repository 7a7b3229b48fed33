//! Volume host: owns the provider and drives the mount lifecycle.

use crate::backend::{MountBackend, MountHandle, MountPoint};
use crate::cache_root::CacheRoot;
use crate::error::{MountError, MountResult};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use vdu_provider::{FileSystemProvider, ProviderConfig};

struct Mounted {
    point: MountPoint,
    handle: Box<dyn MountHandle>,
}

/// Owns the locked cache root, the provider over it, and at most one mount.
pub struct VolumeHost {
    // Field order matters: the mount goes before the provider and the lock.
    mounted: Option<Mounted>,
    backend: Box<dyn MountBackend>,
    provider: Arc<FileSystemProvider>,
    cache: CacheRoot,
}

impl VolumeHost {
    /// Prepares and locks `cache_dir` and creates the provider over it.
    ///
    /// Nothing is mounted until [`start`](Self::start).
    pub fn new(
        cache_dir: &Path,
        config: ProviderConfig,
        backend: Box<dyn MountBackend>,
    ) -> MountResult<Self> {
        let cache = CacheRoot::prepare(cache_dir)?;
        let provider = Arc::new(FileSystemProvider::new(cache.path(), config)?);
        Ok(Self {
            mounted: None,
            backend,
            provider,
            cache,
        })
    }

    /// Mounts the volume at `mount_point`.
    pub fn start(&mut self, mount_point: MountPoint) -> MountResult<()> {
        if let Some(current) = &self.mounted {
            return Err(MountError::AlreadyMounted(current.point.to_string()));
        }
        if let Some(reason) = self.backend.unavailable_reason() {
            return Err(MountError::BackendUnavailable(reason));
        }
        info!(backend = self.backend.name(), mount_point = %mount_point, "Mounting volume");
        let handle = self.backend.mount(Arc::clone(&self.provider), &mount_point)?;
        info!(
            mount_point = %mount_point,
            path = %handle.mount_point().display(),
            "Volume mounted"
        );
        self.mounted = Some(Mounted {
            point: mount_point,
            handle,
        });
        Ok(())
    }

    /// Unmounts the volume.
    pub fn stop(&mut self) -> MountResult<()> {
        let Some(mounted) = self.mounted.take() else {
            return Err(MountError::NotMounted);
        };
        info!(mount_point = %mounted.point, "Unmounting volume");
        mounted.handle.unmount()
    }

    /// Unmounts if mounted, then mounts again at `mount_point`.
    pub fn remount(&mut self, mount_point: MountPoint) -> MountResult<()> {
        if self.is_mounted() {
            self.stop()?;
        }
        self.start(mount_point)
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.is_some()
    }

    /// The mount point currently in use.
    pub fn mount_point(&self) -> Option<&MountPoint> {
        self.mounted.as_ref().map(|m| &m.point)
    }

    /// The directory the volume is mounted on.
    pub fn mounted_path(&self) -> Option<&Path> {
        self.mounted.as_ref().map(|m| m.handle.mount_point())
    }

    pub fn provider(&self) -> &Arc<FileSystemProvider> {
        &self.provider
    }

    pub fn cache_root(&self) -> &Path {
        self.cache.path()
    }
}

impl Drop for VolumeHost {
    fn drop(&mut self) {
        if let Some(mounted) = self.mounted.take()
            && let Err(e) = mounted.handle.unmount()
        {
            warn!(mount_point = %mounted.point, error = %e, "Unmount on drop failed");
        }
    }
}

impl std::fmt::Debug for VolumeHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeHost")
            .field("cache_root", &self.cache.path())
            .field("backend", &self.backend.name())
            .field("mount_point", &self.mount_point())
            .finish_non_exhaustive()
    }
}
