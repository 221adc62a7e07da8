//! Refcount engine: `inc`, `dec`, `saturate`, and the zero transition.
//!
//! This is the fast path. A decrement that reaches zero never eagerly
//! walks the object's children here — it only flips the cell's state to
//! `FREE` (leaf types) or `REFZERO` (everything else) and returns. Walking
//! a `REFZERO` cell's children is the deferred-free processor's job
//! ([`crate::deferred_free`]), triggered lazily the next time the allocator
//! passes over the cell. This keeps `dec` itself O(1) and non-recursive,
//! which matters because it is called from arbitrary mutator threads
//! without holding `alloc_mutex`.

use crate::cell::{Arena, CellHeader, Offset, AllocState, REFCOUNT_MAX};

/// Increment `cell`'s refcount. A no-op on a saturated cell.
///
/// # Safety
/// `offset` must name an `ALLOCATED` cell belonging to `arena`.
pub unsafe fn inc(arena: &Arena, offset: Offset) {
    let header = unsafe { arena.header(offset) };
    header.assert_allocated(offset);
    let counter = header.refcount_atomic();
    let _ = counter.fetch_update(
        std::sync::atomic::Ordering::AcqRel,
        std::sync::atomic::Ordering::Acquire,
        |v| if v == REFCOUNT_MAX { None } else { Some(v + 1) },
    );
}

/// Outcome of a [`dec`] call, telling the caller whether the cell just
/// entered a zero-refcount state and if so which one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecOutcome {
    /// Refcount is still positive (or the cell is saturated).
    StillLive,
    /// Refcount hit zero and the cell was a leaf: it is now `FREE`.
    FreedAsLeaf,
    /// Refcount hit zero and the cell is not a leaf: it is now `REFZERO`
    /// and awaits the deferred-free processor.
    EnteredRefZero,
}

/// Decrement `cell`'s refcount. A no-op on a saturated cell. On reaching
/// zero, performs the zero transition (§4.D): leaf types go straight to
/// `FREE`; everything else goes to `REFZERO` and is left for
/// [`crate::deferred_free::process`] to pick up later.
///
/// # Safety
/// `offset` must name an `ALLOCATED` cell belonging to `arena`.
pub unsafe fn dec(arena: &Arena, offset: Offset) -> DecOutcome {
    let header = unsafe { arena.header(offset) };
    header.assert_allocated(offset);

    if header.is_saturated() {
        return DecOutcome::StillLive;
    }

    let prev = header.refcount_atomic().fetch_sub(1, std::sync::atomic::Ordering::AcqRel);
    if prev == 0 {
        crate::error::fatal(crate::error::HeapError::RefcountUnderflow {
            offset: offset as usize,
        });
    }
    if prev > 1 {
        return DecOutcome::StillLive;
    }

    zero_transition(header, offset)
}

fn zero_transition(header: &CellHeader, offset: Offset) -> DecOutcome {
    if header.is_leaf() {
        header.set_alloc_state(AllocState::Free);
        DecOutcome::FreedAsLeaf
    } else {
        header.set_alloc_state(AllocState::RefZero);
        tracing::trace!(offset, "cell entered REFZERO");
        DecOutcome::EnteredRefZero
    }
}

/// Pin `cell`'s refcount at [`REFCOUNT_MAX`], making it immortal. This is
/// irreversible — a saturated cell is never decremented or reclaimed.
///
/// # Safety
/// `offset` must name an `ALLOCATED` cell belonging to `arena`.
pub unsafe fn saturate(arena: &Arena, offset: Offset) {
    let header = unsafe { arena.header(offset) };
    header.assert_allocated(offset);
    header
        .refcount_atomic()
        .store(REFCOUNT_MAX, std::sync::atomic::Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::flags;

    #[test]
    fn inc_then_dec_is_a_no_op() {
        let arena = Arena::new_owned(64);
        unsafe {
            arena.header_mut(0).init_allocated(64, 0, 0);
            inc(&arena, 0);
            assert_eq!(arena.header(0).refcount(), 2);
            let outcome = dec(&arena, 0);
            assert_eq!(outcome, DecOutcome::StillLive);
            assert_eq!(arena.header(0).refcount(), 1);
        }
    }

    #[test]
    fn dec_to_zero_on_leaf_frees_directly() {
        let arena = Arena::new_owned(64);
        unsafe {
            arena.header_mut(0).init_allocated(64, flags::STRING, 0);
            let outcome = dec(&arena, 0);
            assert_eq!(outcome, DecOutcome::FreedAsLeaf);
            assert_eq!(arena.header(0).alloc_state(), AllocState::Free);
        }
    }

    #[test]
    fn dec_to_zero_on_non_leaf_enters_refzero() {
        let arena = Arena::new_owned(64);
        unsafe {
            arena.header_mut(0).init_allocated(64, flags::CLASS, 0);
            let outcome = dec(&arena, 0);
            assert_eq!(outcome, DecOutcome::EnteredRefZero);
            assert_eq!(arena.header(0).alloc_state(), AllocState::RefZero);
        }
    }

    #[test]
    fn saturate_then_dec_leaves_refcount_unchanged() {
        let arena = Arena::new_owned(64);
        unsafe {
            arena.header_mut(0).init_allocated(64, 0, 0);
            saturate(&arena, 0);
            let outcome = dec(&arena, 0);
            assert_eq!(outcome, DecOutcome::StillLive);
            assert!(arena.header(0).is_saturated());
        }
    }

    #[test]
    #[should_panic(expected = "zero refcount")]
    fn dec_on_already_zero_refcount_is_fatal() {
        // `dec`'s own `RefcountUnderflow` branch (the `prev == 0` case in
        // `fetch_sub`) only fires if a concurrent decrement wins a race
        // between `assert_allocated`'s precondition check and the fetch_sub
        // on this same cell — `assert_allocated` always rejects a
        // zero-refcount ALLOCATED cell first in a single-threaded test, via
        // `CorruptHeap`'s "zero refcount" reason rather than
        // `RefcountUnderflow`'s message. This pins down that actual,
        // reachable fatal path instead.
        let arena = Arena::new_owned(64);
        unsafe {
            let h = arena.header_mut(0);
            h.init_allocated(64, 0, 0);
            h.refcount_atomic().store(0, std::sync::atomic::Ordering::Release);
            let _ = dec(&arena, 0);
        }
    }
}
