//! Root registry (§4.G).
//!
//! Two sources of GC roots: a fixed list of static roots (VM globals — class
//! registry, null singleton, thread/window/user lists, kernel environment,
//! the class object of every built-in internal class) that are always
//! treated as live, and a dynamic array that native code uses to pin an
//! object across a yield point. Only the dynamic array needs synchronized
//! mutation; the static list is set once at heap construction and never
//! changes afterward.

use parking_lot::Mutex;

use crate::cell::{Offset, NULL_REF};
use crate::error::{HeapError, HeapResult};

/// The fixed, always-live root list. Typically populated once at startup
/// with the offsets of the VM's global objects.
#[derive(Debug, Clone, Default)]
pub struct StaticRoots(Vec<Offset>);

impl StaticRoots {
    pub fn new(offsets: Vec<Offset>) -> Self {
        StaticRoots(offsets)
    }

    pub fn iter(&self) -> impl Iterator<Item = Offset> + '_ {
        self.0.iter().copied()
    }
}

/// Spinlock-guarded array of cell offsets pinned by native code. `add`
/// reuses the first `NULL_REF` hole if one exists; `remove` clears the
/// first matching entry to `NULL_REF` rather than compacting the array, so
/// concurrent iteration by the collector never observes a shifted index.
pub struct DynamicRoots {
    entries: Mutex<Vec<Offset>>,
    capacity: usize,
}

impl DynamicRoots {
    pub fn new(capacity: usize) -> Self {
        DynamicRoots {
            entries: Mutex::new(Vec::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Pin `offset` as a root. Fails if the registry is full and has no
    /// holes to reuse.
    pub fn add(&self, offset: Offset) -> HeapResult<()> {
        let mut entries = self.entries.lock();
        if let Some(slot) = entries.iter_mut().find(|e| **e == NULL_REF) {
            *slot = offset;
            return Ok(());
        }
        if entries.len() >= self.capacity {
            return Err(HeapError::DynRootsOverflow {
                capacity: self.capacity,
            });
        }
        entries.push(offset);
        Ok(())
    }

    /// Unpin the first entry equal to `offset`, leaving a hole. A no-op if
    /// `offset` isn't currently registered.
    pub fn remove(&self, offset: Offset) {
        let mut entries = self.entries.lock();
        if let Some(slot) = entries.iter_mut().find(|e| **e == offset) {
            *slot = NULL_REF;
        }
    }

    /// Snapshot of the live (non-hole) entries, for the collector to seed
    /// as roots.
    pub fn snapshot(&self) -> Vec<Offset> {
        self.entries
            .lock()
            .iter()
            .copied()
            .filter(|o| *o != NULL_REF)
            .collect()
    }
}
