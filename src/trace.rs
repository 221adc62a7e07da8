//! The external child-iteration contract.
//!
//! The core never has its own notion of "JS array" or "VM class object" —
//! it only knows how to read a non-internal cell's data area as a packed
//! sequence of `(data, interface)` reference pairs, and how to ask an
//! external [`ClassTable`] to enumerate the reference fields of an
//! internal, non-leaf cell. Both the deferred-free processor (§4.E) and the
//! mark-generation collector (§4.F) are built on top of this one contract,
//! each applying their own traversal policy to what it yields.

use crate::cell::{flags, Arena, Offset, NULL_REF};

/// Callback invoked once per outgoing object reference during a traversal.
pub type ChildVisitor<'a> = dyn FnMut(Offset) + 'a;

/// Supplied by the embedder's class/object model. Given an internal,
/// non-leaf cell, enumerates its reference fields.
///
/// Never invoked for non-internal cells (those are read directly as
/// `(data, interface)` pairs) or for leaf-typed internal cells (`STRING`,
/// `INT`, `CODE` — they carry no outgoing references by construction).
pub trait ClassTable: Send + Sync {
    /// Enumerate the outgoing object references of `cell`, invoking
    /// `visitor` once per reference.
    ///
    /// # Safety
    /// `cell` must be an `ALLOCATED`, internal, non-leaf cell belonging to
    /// `arena`. The implementation may read the cell's data area but must
    /// not mutate the arena.
    unsafe fn iter(&self, arena: &Arena, cell: Offset, visitor: &mut ChildVisitor<'_>);
}

/// A [`ClassTable`] that has nothing to iterate — every internal cell is
/// treated as opaque. Useful for tests and for embedders that only ever
/// store non-internal, pair-addressed objects.
pub struct NullClassTable;

impl ClassTable for NullClassTable {
    unsafe fn iter(&self, _arena: &Arena, _cell: Offset, _visitor: &mut ChildVisitor<'_>) {}
}

/// One `(data, interface)` reference pair as packed in a non-internal
/// cell's data area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefPair {
    /// The data reference, decremented on deferred-free and marked by the collector.
    pub data: Offset,
    /// The interface reference. Marked by the collector but, per the
    /// preserved asymmetry documented in the design notes, never
    /// decremented by the deferred-free processor.
    pub interface: Offset,
}

const PAIR_SIZE: usize = 8; // two u32 offsets

/// Read the packed `(data, interface)` reference pairs out of a
/// non-internal cell's data area.
///
/// # Safety
/// `offset` must name an `ALLOCATED`, non-internal cell belonging to
/// `arena`.
pub unsafe fn reference_pairs(arena: &Arena, offset: Offset) -> Vec<RefPair> {
    let header = unsafe { arena.header(offset) };
    debug_assert!(!header.is_internal());
    let data_size = header.data_size() as usize;
    let count = data_size / PAIR_SIZE;
    let base = unsafe { arena.data_ptr(offset) };
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        unsafe {
            let pair_ptr = base.add(i * PAIR_SIZE) as *const u32;
            let data = std::ptr::read_unaligned(pair_ptr);
            let interface = std::ptr::read_unaligned(pair_ptr.add(1));
            out.push(RefPair { data, interface });
        }
    }
    out
}

/// True if `cell` has no outgoing object references at all: an internal
/// leaf (`STRING`/`INT`/`CODE`). Non-internal cells and non-leaf internal
/// cells always have a traversal policy and are never "no children" by this
/// predicate.
///
/// # Safety
/// `offset` must name a valid cell belonging to `arena`.
pub unsafe fn is_childless_leaf(arena: &Arena, offset: Offset) -> bool {
    let header = unsafe { arena.header(offset) };
    header.is_internal() && flags::is_leaf(header.flags())
}

#[inline]
pub(crate) fn is_null(r: Offset) -> bool {
    r == NULL_REF
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Arena;

    #[test]
    fn reference_pairs_reads_packed_layout() {
        let arena = Arena::new_owned(256);
        unsafe {
            let h = arena.header_mut(0);
            h.init_allocated(64, 0, 16); // two pairs
            let base = arena.data_ptr(0) as *mut u32;
            std::ptr::write(base, 10);
            std::ptr::write(base.add(1), 20);
            std::ptr::write(base.add(2), 30);
            std::ptr::write(base.add(3), 40);

            let pairs = reference_pairs(&arena, 0);
            assert_eq!(
                pairs,
                vec![
                    RefPair {
                        data: 10,
                        interface: 20
                    },
                    RefPair {
                        data: 30,
                        interface: 40
                    }
                ]
            );
        }
    }

    #[test]
    fn leaf_predicate_matches_string_int_code_only() {
        let arena = Arena::new_owned(64);
        unsafe {
            arena
                .header_mut(0)
                .init_allocated(64, flags::INTERNAL | flags::STRING, 0);
            assert!(is_childless_leaf(&arena, 0));

            arena
                .header_mut(0)
                .init_allocated(64, flags::INTERNAL | flags::CLASS, 0);
            assert!(!is_childless_leaf(&arena, 0));
        }
    }
}
