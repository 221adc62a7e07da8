//! Deferred-free processor (§4.E).
//!
//! Walks the children of a `REFZERO` cell, decrementing each one, and
//! finally transitions the cell itself to `FREE`. Triggered lazily by the
//! allocator when its rover search passes over a `REFZERO` cell — never by
//! `dec` itself.
//!
//! Uses an explicit worklist rather than direct recursion: a decrement that
//! zeroes another cell pushes that cell onto the same worklist instead of
//! recursing, which is the bounded alternative the design calls out as
//! preferred.

use parking_lot::Mutex;

use crate::cell::{AllocState, Offset};
use crate::cell::Arena;
use crate::refcount::{self, DecOutcome};
use crate::trace::{self, ClassTable};

/// Owns the spinlock that serializes entry into deferred-free processing.
/// Without it, two threads could both observe the same `REFZERO` cell and
/// walk its children twice.
pub struct DeferredFreeProcessor {
    refzero_spinlock: Mutex<()>,
}

impl Default for DeferredFreeProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferredFreeProcessor {
    pub fn new() -> Self {
        DeferredFreeProcessor {
            refzero_spinlock: Mutex::new(()),
        }
    }

    /// Process the `REFZERO` cell at `offset`: decrement its children
    /// (cascading into any that themselves hit zero) and leave it `FREE`.
    ///
    /// # Safety
    /// `offset` must name a cell in state `REFZERO` belonging to `arena`.
    pub unsafe fn process(&self, arena: &Arena, class_table: &dyn ClassTable, offset: Offset) {
        let _guard = self.refzero_spinlock.lock();
        unsafe { self.process_locked(arena, class_table, offset) };
    }

    unsafe fn process_locked(&self, arena: &Arena, class_table: &dyn ClassTable, offset: Offset) {
        let mut worklist: Vec<Offset> = vec![offset];

        while let Some(cur) = worklist.pop() {
            let header = unsafe { arena.header(cur) };
            debug_assert_eq!(
                header.alloc_state(),
                AllocState::RefZero,
                "deferred-free processor invoked on a non-REFZERO cell"
            );

            if header.is_internal() {
                if !header.is_refzero_childless() {
                    let mut children = Vec::new();
                    unsafe {
                        class_table.iter(arena, cur, &mut |child| children.push(child));
                    }
                    for child in children {
                        self.decrement_and_maybe_cascade(arena, child, &mut worklist);
                    }
                }
                // Internal leaf cells (STRING/INT/CODE/CLASS/INTERFACE)
                // have no outgoing references: nothing to walk. CLASS and
                // INTERFACE must not reach `class_table.iter` here — they
                // carry no reference-pair data area it is allowed to read.
            } else {
                // Non-internal cell: packed (data, interface) reference
                // pairs. Only `.data` is decremented here — `.interface`
                // is intentionally left alone (see design notes on the
                // asymmetry preserved from the original allocator).
                let pairs = unsafe { trace::reference_pairs(arena, cur) };
                for pair in pairs {
                    self.decrement_and_maybe_cascade(arena, pair.data, &mut worklist);
                }
            }

            unsafe { arena.header(cur).set_alloc_state(AllocState::Free) };
            tracing::trace!(offset = cur, "deferred-free cell reclaimed");
        }
    }

    fn decrement_and_maybe_cascade(&self, arena: &Arena, child: Offset, worklist: &mut Vec<Offset>) {
        if trace::is_null(child) {
            return;
        }
        // SAFETY: children enumerated by a ClassTable or read as reference
        // pairs always name allocated cells while they are still reachable
        // from this (still-allocated, REFZERO) parent.
        match unsafe { refcount::dec(arena, child) } {
            DecOutcome::EnteredRefZero => worklist.push(child),
            DecOutcome::StillLive | DecOutcome::FreedAsLeaf => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::flags;
    use crate::trace::NullClassTable;

    #[test]
    fn processing_a_refzero_leaf_free_pairs_frees_children() {
        // cell 0: non-internal, one pair pointing at cell 64 (a leaf string)
        let arena = Arena::new_owned(192);
        unsafe {
            arena.header_mut(64).init_allocated(64, flags::STRING, 0);
            let h = arena.header_mut(0);
            h.init_allocated(64, 0, 8);
            let base = arena.data_ptr(0) as *mut u32;
            std::ptr::write(base, 64); // .data -> cell at 64
            std::ptr::write(base.add(1), crate::cell::NULL_REF); // .interface
            h.set_alloc_state(AllocState::RefZero);
        }

        let processor = DeferredFreeProcessor::new();
        unsafe {
            processor.process(&arena, &NullClassTable, 0);
        }

        assert_eq!(arena.header(0 as Offset).alloc_state(), AllocState::Free);
        assert_eq!(
            unsafe { arena.header(64) }.alloc_state(),
            AllocState::Free,
            "the referenced child should have been decremented to zero and freed"
        );
    }

    #[test]
    fn interface_field_is_not_decremented() {
        let arena = Arena::new_owned(192);
        unsafe {
            // interface target starts with refcount 2; only .data (cell
            // 0's pair) references it via `.data`... to exercise the
            // asymmetry we point `.interface` at a second live cell and
            // confirm its refcount is untouched.
            arena.header_mut(64).init_allocated(64, flags::STRING, 0);
            let h = arena.header_mut(0);
            h.init_allocated(64, 0, 8);
            let base = arena.data_ptr(0) as *mut u32;
            std::ptr::write(base, crate::cell::NULL_REF); // .data
            std::ptr::write(base.add(1), 64); // .interface -> cell at 64
            h.set_alloc_state(AllocState::RefZero);
        }

        let processor = DeferredFreeProcessor::new();
        unsafe {
            processor.process(&arena, &NullClassTable, 0);
        }

        assert_eq!(
            unsafe { arena.header(64) }.refcount(),
            1,
            ".interface must not be decremented by the deferred-free processor"
        );
        assert_eq!(unsafe { arena.header(64) }.alloc_state(), AllocState::Allocated);
    }

    /// A [`ClassTable`] that panics if `iter` is ever invoked, for tests
    /// asserting a cell must never reach the class-table traversal path.
    struct PanicsOnIterClassTable;

    impl ClassTable for PanicsOnIterClassTable {
        unsafe fn iter(&self, _arena: &Arena, _cell: Offset, _visitor: &mut crate::trace::ChildVisitor<'_>) {
            panic!("class_table.iter must not be called for a CLASS/INTERFACE cell");
        }
    }

    #[test]
    fn internal_class_cell_skips_class_table_iteration() {
        let arena = Arena::new_owned(64);
        unsafe {
            let h = arena.header_mut(0);
            h.init_allocated(64, flags::INTERNAL | flags::CLASS, 0);
            h.set_alloc_state(AllocState::RefZero);
        }

        let processor = DeferredFreeProcessor::new();
        unsafe {
            processor.process(&arena, &PanicsOnIterClassTable, 0);
        }

        assert_eq!(unsafe { arena.header(0) }.alloc_state(), AllocState::Free);
    }

    #[test]
    fn internal_interface_cell_skips_class_table_iteration() {
        let arena = Arena::new_owned(64);
        unsafe {
            let h = arena.header_mut(0);
            h.init_allocated(64, flags::INTERNAL | flags::INTERFACE, 0);
            h.set_alloc_state(AllocState::RefZero);
        }

        let processor = DeferredFreeProcessor::new();
        unsafe {
            processor.process(&arena, &PanicsOnIterClassTable, 0);
        }

        assert_eq!(unsafe { arena.header(0) }.alloc_state(), AllocState::Free);
    }
}
