//! Generation-checked descriptor table.
//!
//! Every successful `create`/`open` inserts a [`FileDescriptor`] and hands the
//! caller an opaque [`DescriptorHandle`]. Handles pack a 32-bit slot index and
//! a 32-bit generation, so a slot can be recycled without an old handle ever
//! reaching the new occupant.
//!
//! # Slot lifecycle
//!
//! 1. **Live**: created by [`DescriptorTable::insert`]
//! 2. **Dead**: after [`DescriptorTable::invalidate`] (delete-on-close cleanup);
//!    the native handle is gone and every lookup yields `StaleHandle`
//! 3. **Vacant**: after [`DescriptorTable::remove`] (close); the generation is
//!    bumped and the index is recycled, and old handles yield `InvalidHandle`

use crate::enumeration::DirectoryCursor;
use crate::error::{ProviderError, ProviderResult};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Opaque caller-visible handle. Zero is never issued.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorHandle(u64);

impl DescriptorHandle {
    fn new(index: u32, generation: u32) -> Self {
        Self((u64::from(index) << 32) | u64::from(generation))
    }

    /// Reconstructs a handle from its raw value (e.g. a FUSE `fh`).
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value suitable for passing through a framework.
    pub fn into_raw(self) -> u64 {
        self.0
    }

    #[allow(clippy::cast_possible_truncation)]
    fn index(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[allow(clippy::cast_possible_truncation)]
    fn generation(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Debug for DescriptorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DescriptorHandle({}:{})", self.index(), self.generation())
    }
}

/// One open handle to a backing file or directory.
#[derive(Debug)]
pub struct FileDescriptor {
    file: Option<File>,
    path: PathBuf,
    is_dir: bool,
    delete_on_close: bool,
    write_access: bool,
    detached: bool,
    /// Present only for directories, once enumeration has started.
    pub cursor: Option<DirectoryCursor>,
}

impl FileDescriptor {
    /// Wraps a freshly opened native handle.
    pub fn new(file: File, path: PathBuf, is_dir: bool, delete_on_close: bool) -> Self {
        Self {
            file: Some(file),
            path,
            is_dir,
            delete_on_close,
            write_access: false,
            detached: false,
            cursor: None,
        }
    }

    /// Native handle. Fails once the handle has been released.
    pub fn file(&self) -> ProviderResult<&File> {
        self.file
            .as_ref()
            .ok_or_else(|| ProviderError::Io {
                op: "file",
                source: std::io::Error::from_raw_os_error(libc::EBADF),
            })
    }

    /// Records whether the native handle was opened for writing.
    #[must_use]
    pub fn with_write_access(mut self, write_access: bool) -> Self {
        self.write_access = write_access;
        self
    }

    pub fn has_write_access(&self) -> bool {
        self.write_access
    }

    /// Releases the native handle and any enumeration state.
    pub fn release(&mut self) {
        self.cursor = None;
        self.file = None;
    }

    /// Backing path of the object.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Updates the backing path after a rename.
    pub fn set_path(&mut self, path: PathBuf) {
        self.path = path;
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// Whether the object is removed when this handle is cleaned up.
    pub fn delete_on_close(&self) -> bool {
        self.delete_on_close
    }

    /// Records that a rename replaced this object: its path now names a
    /// different object and must not be acted on.
    pub fn detach(&mut self) {
        self.detached = true;
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }
}

/// Shared reference to a live descriptor.
pub type DescriptorRef = Arc<Mutex<FileDescriptor>>;

#[derive(Debug)]
enum SlotState {
    Live(DescriptorRef),
    Dead,
    Vacant,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    state: SlotState,
}

/// Arena of descriptor slots keyed by generation-checked handles.
#[derive(Debug, Default)]
pub struct DescriptorTable {
    slots: DashMap<u32, Slot>,
    free: Mutex<Vec<u32>>,
    next_index: AtomicU32,
}

impl DescriptorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a descriptor and returns its handle.
    pub fn insert(&self, descriptor: FileDescriptor) -> DescriptorHandle {
        let live = SlotState::Live(Arc::new(Mutex::new(descriptor)));
        if let Some(index) = self.free.lock().pop()
            && let Some(mut slot) = self.slots.get_mut(&index)
        {
            slot.state = live;
            return DescriptorHandle::new(index, slot.generation);
        }

        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        self.slots.insert(
            index,
            Slot {
                generation: 1,
                state: live,
            },
        );
        DescriptorHandle::new(index, 1)
    }

    /// Looks up a live descriptor.
    pub fn get(&self, handle: DescriptorHandle) -> ProviderResult<DescriptorRef> {
        let slot = self.slot(handle)?;
        match &slot.state {
            SlotState::Live(descriptor) => Ok(Arc::clone(descriptor)),
            SlotState::Dead => Err(ProviderError::StaleHandle(handle.into_raw())),
            SlotState::Vacant => Err(ProviderError::InvalidHandle(handle.into_raw())),
        }
    }

    /// Marks the slot dead and returns the descriptor it held.
    ///
    /// The caller releases the native handle; later lookups fail with
    /// `StaleHandle` until the slot is removed.
    pub fn invalidate(&self, handle: DescriptorHandle) -> ProviderResult<DescriptorRef> {
        let mut slot = self.slot_mut(handle)?;
        match std::mem::replace(&mut slot.state, SlotState::Dead) {
            SlotState::Live(descriptor) => Ok(descriptor),
            SlotState::Dead => Err(ProviderError::StaleHandle(handle.into_raw())),
            SlotState::Vacant => {
                slot.state = SlotState::Vacant;
                Err(ProviderError::InvalidHandle(handle.into_raw()))
            }
        }
    }

    /// Frees the slot. Returns the descriptor if it was still live.
    ///
    /// Removing a dead slot succeeds and returns `None`.
    pub fn remove(&self, handle: DescriptorHandle) -> ProviderResult<Option<DescriptorRef>> {
        let previous = {
            let mut slot = self.slot_mut(handle)?;
            if matches!(slot.state, SlotState::Vacant) {
                return Err(ProviderError::InvalidHandle(handle.into_raw()));
            }
            let previous = std::mem::replace(&mut slot.state, SlotState::Vacant);
            slot.generation = match slot.generation.wrapping_add(1) {
                0 => 1,
                g => g,
            };
            previous
        };
        self.free.lock().push(handle.index());
        Ok(match previous {
            SlotState::Live(descriptor) => Some(descriptor),
            SlotState::Dead | SlotState::Vacant => None,
        })
    }

    /// Number of live descriptors.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.state, SlotState::Live(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every live descriptor (used for open-handle path updates).
    pub fn live(&self) -> Vec<DescriptorRef> {
        self.slots
            .iter()
            .filter_map(|slot| match &slot.state {
                SlotState::Live(descriptor) => Some(Arc::clone(descriptor)),
                SlotState::Dead | SlotState::Vacant => None,
            })
            .collect()
    }

    fn slot(
        &self,
        handle: DescriptorHandle,
    ) -> ProviderResult<dashmap::mapref::one::Ref<'_, u32, Slot>> {
        match self.slots.get(&handle.index()) {
            Some(slot) if slot.generation == handle.generation() && handle.into_raw() != 0 => {
                Ok(slot)
            }
            _ => Err(ProviderError::InvalidHandle(handle.into_raw())),
        }
    }

    fn slot_mut(
        &self,
        handle: DescriptorHandle,
    ) -> ProviderResult<dashmap::mapref::one::RefMut<'_, u32, Slot>> {
        match self.slots.get_mut(&handle.index()) {
            Some(slot) if slot.generation == handle.generation() && handle.into_raw() != 0 => {
                Ok(slot)
            }
            _ => Err(ProviderError::InvalidHandle(handle.into_raw())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;
    use tempfile::NamedTempFile;

    fn descriptor() -> (NamedTempFile, FileDescriptor) {
        let tmp = NamedTempFile::new().unwrap();
        let file = tmp.reopen().unwrap();
        let path = tmp.path().to_path_buf();
        (tmp, FileDescriptor::new(file, path, false, false))
    }

    #[test]
    fn test_insert_and_get() {
        let table = DescriptorTable::new();
        let (_tmp, d) = descriptor();
        let path = d.path().to_path_buf();

        let handle = table.insert(d);
        assert_ne!(handle.into_raw(), 0);
        assert_eq!(table.len(), 1);

        let fd = table.get(handle).unwrap();
        assert_eq!(fd.lock().path(), path);
        assert!(fd.lock().file().is_ok());
    }

    #[test]
    fn test_zero_handle_is_invalid() {
        let table = DescriptorTable::new();
        let (_tmp, d) = descriptor();
        table.insert(d);
        assert!(matches!(
            table.get(DescriptorHandle::from_raw(0)),
            Err(ProviderError::InvalidHandle(0))
        ));
    }

    #[test]
    fn test_invalidated_handle_is_stale() {
        let table = DescriptorTable::new();
        let (_tmp, d) = descriptor();
        let handle = table.insert(d);

        let fd = table.invalidate(handle).unwrap();
        fd.lock().release();
        assert!(fd.lock().file().is_err());

        assert!(matches!(table.get(handle), Err(ProviderError::StaleHandle(_))));
        assert!(matches!(
            table.invalidate(handle),
            Err(ProviderError::StaleHandle(_))
        ));
        assert_eq!(table.len(), 0);

        // Closing a dead handle still succeeds.
        assert!(table.remove(handle).unwrap().is_none());
        assert!(matches!(table.get(handle), Err(ProviderError::InvalidHandle(_))));
    }

    #[test]
    fn test_recycled_slot_rejects_old_handle() {
        let table = DescriptorTable::new();
        let (_t1, d1) = descriptor();
        let (_t2, d2) = descriptor();

        let old = table.insert(d1);
        table.remove(old).unwrap();
        let new = table.insert(d2);

        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);
        assert!(matches!(table.get(old), Err(ProviderError::InvalidHandle(_))));
        assert!(table.get(new).is_ok());
        assert!(matches!(table.remove(old), Err(ProviderError::InvalidHandle(_))));
    }

    #[test]
    fn test_double_remove_fails() {
        let table = DescriptorTable::new();
        let (_tmp, d) = descriptor();
        let handle = table.insert(d);
        assert!(table.remove(handle).unwrap().is_some());
        assert!(table.remove(handle).is_err());
    }

    #[test]
    fn test_generation_skips_zero_on_wrap() {
        let table = DescriptorTable::new();
        let (_t1, d1) = descriptor();
        let handle = table.insert(d1);
        table.slots.get_mut(&handle.index()).unwrap().generation = u32::MAX;
        let forged = DescriptorHandle::new(handle.index(), u32::MAX);
        table.remove(forged).unwrap();

        let (_t2, d2) = descriptor();
        let next = table.insert(d2);
        assert_eq!(next.generation(), 1);
    }

    #[test]
    fn test_concurrent_insert_unique_handles() {
        let table = Arc::new(DescriptorTable::new());
        let tmp = Arc::new(NamedTempFile::new().unwrap());
        let mut handles = vec![];

        for _ in 0..8 {
            let table = Arc::clone(&table);
            let tmp = Arc::clone(&tmp);
            handles.push(thread::spawn(move || {
                (0..25)
                    .map(|_| {
                        let file = tmp.reopen().unwrap();
                        table.insert(FileDescriptor::new(
                            file,
                            tmp.path().to_path_buf(),
                            false,
                            false,
                        ))
                    })
                    .collect::<Vec<_>>()
            }));
        }

        let all: Vec<DescriptorHandle> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(unique.len(), 200);
        assert_eq!(table.len(), 200);
    }
}
