//! Inode management for the FUSE adapter.
//!
//! Maps kernel inode numbers to virtual provider paths (`\dir\file`). The
//! provider resolves names case-insensitively, so the reverse map is keyed
//! by the lower-cased path: `\A.TXT` and `\a.txt` share one inode.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// The root inode number (FUSE convention).
pub const ROOT_INODE: u64 = 1;

/// Virtual path of the volume root.
pub const ROOT_PATH: &str = "\\";

/// Joins a virtual directory path and a child name.
pub fn child_path(parent: &str, name: &str) -> String {
    if parent == ROOT_PATH {
        format!("\\{name}")
    } else {
        format!("{parent}\\{name}")
    }
}

/// Parent of a virtual path; the root is its own parent.
pub fn parent_path(path: &str) -> &str {
    match path.rfind('\\') {
        Some(0) | None => ROOT_PATH,
        Some(i) => &path[..i],
    }
}

fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('\\').filter(|p| !p.is_empty())
}

fn key(path: &str) -> String {
    path.to_lowercase()
}

/// An entry in the inode table.
#[derive(Debug)]
pub struct InodeEntry {
    /// Virtual path, in the case first seen.
    pub path: String,
    /// Lookup count for `forget()` handling.
    nlookup: AtomicU64,
}

impl InodeEntry {
    fn new(path: String, nlookup: u64) -> Self {
        Self {
            path,
            nlookup: AtomicU64::new(nlookup),
        }
    }

    pub fn nlookup(&self) -> u64 {
        self.nlookup.load(Ordering::Relaxed)
    }

    /// Decrements the lookup count, saturating at zero. Returns the new count.
    fn dec_nlookup(&self, count: u64) -> u64 {
        let mut current = self.nlookup.load(Ordering::Acquire);
        loop {
            let next = current.saturating_sub(count);
            match self.nlookup.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Thread-safe bidirectional map between inodes and virtual paths.
#[derive(Debug)]
pub struct InodeTable {
    by_key: DashMap<String, u64>,
    entries: DashMap<u64, InodeEntry>,
    next: AtomicU64,
}

impl InodeTable {
    /// Creates a table holding only the root inode.
    pub fn new() -> Self {
        let table = Self {
            by_key: DashMap::new(),
            entries: DashMap::new(),
            next: AtomicU64::new(ROOT_INODE + 1),
        };
        table.by_key.insert(key(ROOT_PATH), ROOT_INODE);
        table
            .entries
            .insert(ROOT_INODE, InodeEntry::new(ROOT_PATH.to_string(), 1));
        table
    }

    /// Returns the inode for `path`, allocating one if needed, and counts
    /// one kernel lookup.
    pub fn get_or_insert(&self, path: &str) -> u64 {
        self.insert_with(path, 1)
    }

    /// Like [`get_or_insert`](Self::get_or_insert) but without counting a
    /// lookup, for `readdir` entries.
    pub fn get_or_insert_no_lookup_inc(&self, path: &str) -> u64 {
        self.insert_with(path, 0)
    }

    fn insert_with(&self, path: &str, lookups: u64) -> u64 {
        let inode = *self
            .by_key
            .entry(key(path))
            .or_insert_with(|| self.next.fetch_add(1, Ordering::Relaxed));
        let entry = self
            .entries
            .entry(inode)
            .or_insert_with(|| InodeEntry::new(path.to_string(), 0));
        entry.nlookup.fetch_add(lookups, Ordering::Relaxed);
        inode
    }

    /// Virtual path of `inode`.
    pub fn path(&self, inode: u64) -> Option<String> {
        self.entries.get(&inode).map(|e| e.path.clone())
    }

    /// Inode currently assigned to `path`.
    pub fn get_inode(&self, path: &str) -> Option<u64> {
        self.by_key.get(&key(path)).map(|r| *r)
    }

    /// Inode of the parent directory of `path`.
    pub fn parent_inode(&self, path: &str) -> u64 {
        self.get_inode(parent_path(path)).unwrap_or(ROOT_INODE)
    }

    /// Drops `count` kernel lookups; evicts the inode when none remain.
    ///
    /// Returns `true` if the inode was evicted. The root is never evicted.
    pub fn forget(&self, inode: u64, count: u64) -> bool {
        if inode == ROOT_INODE {
            return false;
        }
        let remaining = match self.entries.get(&inode) {
            Some(entry) => entry.dec_nlookup(count),
            None => return false,
        };
        if remaining > 0 {
            return false;
        }
        match self.entries.remove(&inode) {
            Some((_, entry)) => {
                self.by_key.remove_if(&key(&entry.path), |_, id| *id == inode);
                true
            }
            None => false,
        }
    }

    /// Removes the path mapping after a delete.
    ///
    /// The entry stays until the kernel forgets it, since the kernel may
    /// still pass the inode to later calls.
    pub fn invalidate_path(&self, path: &str) {
        self.by_key.remove(&key(path));
    }

    /// Moves `from` and everything below it to `to`.
    ///
    /// Any inode previously mapped at `to` loses its mapping.
    pub fn rename(&self, from: &str, to: &str) {
        let from_key = key(from);
        let prefix = format!("{from_key}\\");
        let moved: Vec<(String, u64)> = self
            .by_key
            .iter()
            .filter(|r| *r.key() == from_key || r.key().starts_with(&prefix))
            .map(|r| (r.key().clone(), *r.value()))
            .collect();

        if key(to) != from_key {
            self.invalidate_path(to);
        }
        let depth = components(from).count();
        for (old_key, inode) in moved {
            self.by_key.remove_if(&old_key, |_, id| *id == inode);
            let Some(mut entry) = self.entries.get_mut(&inode) else {
                continue;
            };
            let moved_path = components(&entry.path)
                .skip(depth)
                .fold(to.to_string(), |acc, part| child_path(&acc, part));
            self.by_key.insert(key(&moved_path), inode);
            entry.path = moved_path;
        }
    }

    /// Number of inodes, including the root.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if only the root inode remains.
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}
