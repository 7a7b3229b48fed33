//! Volume host lifecycle tests against an in-process backend.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use vdu_mount::{MountBackend, MountError, MountHandle, MountPoint, MountResult, VolumeHost};
use vdu_provider::{FileSystemProvider, ProviderConfig};

/// Backend that records mount and unmount calls instead of touching the OS.
#[derive(Clone, Default)]
struct RecordingBackend {
    events: Arc<Mutex<Vec<String>>>,
    unavailable: bool,
}

impl RecordingBackend {
    fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

struct RecordingHandle {
    mount_point: PathBuf,
    events: Arc<Mutex<Vec<String>>>,
}

impl MountHandle for RecordingHandle {
    fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    fn unmount(self: Box<Self>) -> MountResult<()> {
        self.events
            .lock()
            .push(format!("unmount {}", self.mount_point.display()));
        Ok(())
    }
}

impl MountBackend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn is_available(&self) -> bool {
        !self.unavailable
    }

    fn mount(
        &self,
        provider: Arc<FileSystemProvider>,
        target: &MountPoint,
    ) -> MountResult<Box<dyn MountHandle>> {
        let mount_point = target.resolve(Path::new("/drives"));
        self.events.lock().push(format!(
            "mount {} over {}",
            mount_point.display(),
            provider.root().display()
        ));
        Ok(Box::new(RecordingHandle {
            mount_point,
            events: Arc::clone(&self.events),
        }))
    }
}

fn host(tmp: &TempDir, backend: &RecordingBackend) -> VolumeHost {
    VolumeHost::new(
        &tmp.path().join("cache"),
        ProviderConfig::default(),
        Box::new(backend.clone()),
    )
    .unwrap()
}

#[test]
fn test_start_and_stop() {
    let tmp = TempDir::new().unwrap();
    let backend = RecordingBackend::default();
    let mut host = host(&tmp, &backend);
    assert!(!host.is_mounted());

    host.start(MountPoint::Drive('X')).unwrap();
    assert!(host.is_mounted());
    assert_eq!(host.mount_point(), Some(&MountPoint::Drive('X')));
    assert_eq!(host.mounted_path(), Some(Path::new("/drives/X")));

    host.stop().unwrap();
    assert!(!host.is_mounted());
    let events = backend.events();
    assert_eq!(events.len(), 2);
    assert!(events[0].starts_with("mount /drives/X over "));
    assert_eq!(events[1], "unmount /drives/X");
}

#[test]
fn test_start_twice_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let backend = RecordingBackend::default();
    let mut host = host(&tmp, &backend);

    host.start(MountPoint::Drive('X')).unwrap();
    let err = host.start(MountPoint::Drive('Y')).unwrap_err();
    assert!(matches!(err, MountError::AlreadyMounted(p) if p == "X:"));
    assert_eq!(backend.events().len(), 1);
}

#[test]
fn test_stop_when_not_mounted() {
    let tmp = TempDir::new().unwrap();
    let mut host = host(&tmp, &RecordingBackend::default());
    assert!(matches!(host.stop(), Err(MountError::NotMounted)));
}

#[test]
fn test_remount_moves_the_volume() {
    let tmp = TempDir::new().unwrap();
    let backend = RecordingBackend::default();
    let mut host = host(&tmp, &backend);

    host.remount(MountPoint::Drive('X')).unwrap();
    host.remount(MountPoint::Drive('Y')).unwrap();
    assert_eq!(host.mount_point(), Some(&MountPoint::Drive('Y')));

    let events = backend.events();
    assert_eq!(events.len(), 3);
    assert_eq!(events[1], "unmount /drives/X");
    assert!(events[2].starts_with("mount /drives/Y"));
}

#[test]
fn test_unavailable_backend() {
    let tmp = TempDir::new().unwrap();
    let backend = RecordingBackend::unavailable();
    let mut host = host(&tmp, &backend);

    let err = host.start(MountPoint::Drive('X')).unwrap_err();
    assert!(matches!(err, MountError::BackendUnavailable(_)));
    assert!(backend.events().is_empty());
}

#[test]
fn test_drop_unmounts() {
    let tmp = TempDir::new().unwrap();
    let backend = RecordingBackend::default();
    {
        let mut host = host(&tmp, &backend);
        host.start(MountPoint::Path(PathBuf::from("/mnt/work"))).unwrap();
    }
    assert_eq!(backend.events().last().map(String::as_str), Some("unmount /mnt/work"));
}

#[test]
fn test_cache_root_is_exclusive() {
    let tmp = TempDir::new().unwrap();
    let backend = RecordingBackend::default();
    let first = host(&tmp, &backend);

    let second = VolumeHost::new(
        &tmp.path().join("cache"),
        ProviderConfig::default(),
        Box::new(backend.clone()),
    );
    assert!(matches!(second, Err(MountError::Locked(_))));

    drop(first);
    assert!(
        VolumeHost::new(
            &tmp.path().join("cache"),
            ProviderConfig::default(),
            Box::new(backend),
        )
        .is_ok()
    );
}

#[test]
fn test_provider_serves_cache_root() {
    let tmp = TempDir::new().unwrap();
    let host = host(&tmp, &RecordingBackend::default());
    std::fs::write(host.cache_root().join("seed.txt"), b"seed").unwrap();

    let opened = host
        .provider()
        .open(
            "\\SEED.TXT",
            vdu_provider::CreateOptions::empty(),
            vdu_provider::AccessMask::GENERIC_READ,
        )
        .unwrap();
    assert_eq!(opened.info.file_size, 4);
    host.provider().close(opened.handle).unwrap();
}
