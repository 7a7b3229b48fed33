//! Virtual path to backing path translation.
//!
//! Virtual paths arrive in NT form (`\dir\file.txt`) from NT-facing
//! frameworks and in POSIX form from the FUSE adapter; both separators are
//! accepted and empty components are ignored. Every accepted path maps to a
//! location strictly inside the mount root:
//!
//! - `.` and `..` components are rejected rather than normalized
//! - characters NT forbids in names (including `:` for alternate data
//!   streams, NUL and control characters) are rejected
//! - components longer than [`MAX_COMPONENT_LENGTH`] and mapped paths longer
//!   than the configured maximum are rejected
//!
//! Name lookup is case-insensitive but case-preserving: a component is first
//! tried verbatim and then matched case-insensitively against the parent
//! directory's listing, so `\Docs\A.TXT` finds `docs/a.txt` on a
//! case-sensitive backing store.

use crate::error::{ProviderError, ProviderResult};
use crate::info::MAX_COMPONENT_LENGTH;
use std::fs;
use std::path::{Path, PathBuf};

/// Default limit on the byte length of a mapped backing path.
pub const DEFAULT_MAX_PATH_LEN: usize = 4096;

/// Characters NT does not allow inside a name.
const FORBIDDEN: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// Compares two names the way a case-insensitive volume does.
pub fn names_equal(a: &str, b: &str) -> bool {
    a == b
        || a.chars()
            .flat_map(char::to_lowercase)
            .eq(b.chars().flat_map(char::to_lowercase))
}

/// Where a new object would be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTarget {
    /// Backing path of the (existing) parent directory.
    pub parent: PathBuf,
    /// Final component as the caller spelled it.
    pub name: String,
    /// Backing path of an existing sibling whose name matches
    /// case-insensitively, if any.
    pub existing: Option<PathBuf>,
}

impl CreateTarget {
    /// Backing path the new object will occupy.
    pub fn path(&self) -> PathBuf {
        self.parent.join(&self.name)
    }
}

/// Maps virtual paths onto one fixed backing root.
#[derive(Debug, Clone)]
pub struct PathMapper {
    root: PathBuf,
    max_path_len: usize,
}

impl PathMapper {
    /// Creates a mapper for `root`, which should already be canonical.
    pub fn new(root: impl Into<PathBuf>, max_path_len: usize) -> Self {
        Self {
            root: root.into(),
            max_path_len,
        }
    }

    /// The backing root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Splits and validates a virtual path.
    pub fn components(virtual_path: &str) -> ProviderResult<Vec<&str>> {
        let mut out = Vec::new();
        for component in virtual_path.split(['\\', '/']) {
            if component.is_empty() {
                continue;
            }
            if component == "." || component == ".." {
                return Err(ProviderError::PathInvalid(virtual_path.to_string()));
            }
            if component.len() > MAX_COMPONENT_LENGTH
                || component
                    .chars()
                    .any(|c| c.is_control() || FORBIDDEN.contains(&c))
            {
                return Err(ProviderError::PathInvalid(virtual_path.to_string()));
            }
            out.push(component);
        }
        Ok(out)
    }

    /// Maps a virtual path literally (no case folding, no existence check).
    pub fn map(&self, virtual_path: &str) -> ProviderResult<PathBuf> {
        let mut path = self.root.clone();
        for component in Self::components(virtual_path)? {
            path.push(component);
        }
        self.check_len(virtual_path, path)
    }

    /// Resolves a virtual path to the backing path of an existing object.
    ///
    /// Fails with `NotFound` when the final component is missing and with
    /// `ParentNotFound` when an intermediate directory is missing.
    pub fn resolve(&self, virtual_path: &str) -> ProviderResult<PathBuf> {
        let components = Self::components(virtual_path)?;
        let last = components.len().saturating_sub(1);
        let mut current = self.root.clone();
        for (i, component) in components.iter().enumerate() {
            match lookup(&current, component) {
                Some(next) => {
                    if i < last && !next.is_dir() {
                        return Err(ProviderError::ParentNotFound(virtual_path.to_string()));
                    }
                    current = next;
                }
                None if i == last => {
                    return Err(ProviderError::NotFound(virtual_path.to_string()));
                }
                None => return Err(ProviderError::ParentNotFound(virtual_path.to_string())),
            }
        }
        self.check_len(virtual_path, current)
    }

    /// Resolves the parent of a virtual path for object creation.
    pub fn resolve_for_create(&self, virtual_path: &str) -> ProviderResult<CreateTarget> {
        let components = Self::components(virtual_path)?;
        let Some((name, parents)) = components.split_last() else {
            // The root always exists.
            return Err(ProviderError::AlreadyExists(virtual_path.to_string()));
        };
        let mut parent = self.root.clone();
        for component in parents {
            match lookup(&parent, component) {
                Some(next) if next.is_dir() => parent = next,
                _ => return Err(ProviderError::ParentNotFound(virtual_path.to_string())),
            }
        }
        let existing = lookup(&parent, name);
        let target = CreateTarget {
            parent,
            name: (*name).to_string(),
            existing,
        };
        self.check_len(virtual_path, target.path())?;
        Ok(target)
    }

    fn check_len(&self, virtual_path: &str, path: PathBuf) -> ProviderResult<PathBuf> {
        if path.as_os_str().len() > self.max_path_len {
            return Err(ProviderError::PathInvalid(virtual_path.to_string()));
        }
        Ok(path)
    }
}

/// Finds `name` in `dir`, exactly first and then case-insensitively.
fn lookup(dir: &Path, name: &str) -> Option<PathBuf> {
    let exact = dir.join(name);
    if fs::symlink_metadata(&exact).is_ok() {
        return Some(exact);
    }
    fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .find(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|candidate| names_equal(candidate, name))
        })
        .map(|entry| entry.path())
}
