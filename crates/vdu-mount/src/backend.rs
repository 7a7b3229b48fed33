//! Mount backend abstraction.
//!
//! A [`MountBackend`] exposes a [`FileSystemProvider`] at a [`MountPoint`]
//! through some OS mechanism (FUSE on Linux and macOS). The returned
//! [`MountHandle`] controls the mount's lifetime.

use crate::error::{MountError, MountResult};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use vdu_provider::FileSystemProvider;

/// Where a volume is exposed: a drive letter or an explicit directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountPoint {
    /// Drive letter, always upper case.
    Drive(char),
    /// Explicit mount directory.
    Path(PathBuf),
}

impl MountPoint {
    /// Returns the directory to mount on.
    ///
    /// Drive letters map to a directory named after the letter under
    /// `drive_root`, so `X:` becomes `<drive_root>/X`.
    pub fn resolve(&self, drive_root: &Path) -> PathBuf {
        match self {
            Self::Drive(letter) => drive_root.join(letter.to_string()),
            Self::Path(path) => path.clone(),
        }
    }

    /// Short name for volume labels and log lines.
    pub fn label(&self) -> String {
        match self {
            Self::Drive(letter) => letter.to_string(),
            Self::Path(path) => path
                .file_name()
                .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned()),
        }
    }
}

impl FromStr for MountPoint {
    type Err = MountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(MountError::InvalidMountPoint(s.to_string()));
        }
        let letter = trimmed.strip_suffix(':').unwrap_or(trimmed);
        let mut chars = letter.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_alphabetic() => Ok(Self::Drive(c.to_ascii_uppercase())),
            _ if trimmed.ends_with(':') && !trimmed.contains('/') => {
                Err(MountError::InvalidMountPoint(s.to_string()))
            }
            _ => Ok(Self::Path(PathBuf::from(trimmed))),
        }
    }
}

impl fmt::Display for MountPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drive(letter) => write!(f, "{letter}:"),
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A handle to a mounted volume.
///
/// Dropping the handle must unmount, even if [`unmount`](Self::unmount) was
/// never called.
pub trait MountHandle: Send {
    /// The directory the volume is mounted on.
    fn mount_point(&self) -> &Path;

    /// Unmounts, waiting for the session to finish.
    fn unmount(self: Box<Self>) -> MountResult<()>;
}

/// A mechanism that can expose a provider as a mounted volume.
pub trait MountBackend: Send + Sync {
    /// Human-readable name used in logs, e.g. "FUSE".
    fn name(&self) -> &'static str;

    /// Whether the OS side of this backend is installed.
    fn is_available(&self) -> bool;

    /// Why the backend is unavailable, or `None` when it is available.
    fn unavailable_reason(&self) -> Option<String> {
        (!self.is_available()).then(|| format!("{} is not available on this system", self.name()))
    }

    /// Mounts `provider` at `target`.
    fn mount(
        &self,
        provider: Arc<FileSystemProvider>,
        target: &MountPoint,
    ) -> MountResult<Box<dyn MountHandle>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_drive_letters() {
        assert_eq!("X:".parse::<MountPoint>().unwrap(), MountPoint::Drive('X'));
        assert_eq!("q".parse::<MountPoint>().unwrap(), MountPoint::Drive('Q'));
        assert_eq!(" v: ".parse::<MountPoint>().unwrap(), MountPoint::Drive('V'));
    }

    #[test]
    fn test_parse_paths() {
        assert_eq!(
            "/mnt/vdu".parse::<MountPoint>().unwrap(),
            MountPoint::Path(PathBuf::from("/mnt/vdu"))
        );
        assert_eq!(
            "drive".parse::<MountPoint>().unwrap(),
            MountPoint::Path(PathBuf::from("drive"))
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<MountPoint>().is_err());
        assert!("XY:".parse::<MountPoint>().is_err());
        assert!("1:".parse::<MountPoint>().is_err());
    }

    #[test]
    fn test_resolve_and_display() {
        let root = Path::new("/run/vdu");
        let drive = MountPoint::Drive('X');
        assert_eq!(drive.resolve(root), PathBuf::from("/run/vdu/X"));
        assert_eq!(drive.to_string(), "X:");
        assert_eq!(drive.label(), "X");

        let path = MountPoint::Path(PathBuf::from("/media/work"));
        assert_eq!(path.resolve(root), PathBuf::from("/media/work"));
        assert_eq!(path.label(), "work");
    }
}
