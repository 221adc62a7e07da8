//! Bump-rover free-list allocator (§4.C).
//!
//! A single cursor — the *rover* — remembers where the last allocation
//! ended. Each call resumes the search there, wraps once at the end of the
//! arena, and returns the first cell that fits (first-fit, not best-fit).
//! `REFZERO` cells encountered along the way are handed to the
//! deferred-free processor before the search continues, which is how a
//! cycle-free but not-yet-reclaimed object gets its bytes back without a
//! full collection.
//!
//! This module performs exactly one linear pass; it never triggers a
//! collection itself. [`crate::heap::Heap::allocate`] is responsible for
//! retrying once, through the collector, on failure.

use crate::cell::{AllocState, Arena, Offset, HEADER_SIZE};
use crate::deferred_free::DeferredFreeProcessor;
use crate::trace::ClassTable;
use crate::walker::wrap_next;

/// Hard floor below which a leftover free fragment is absorbed into the
/// allocation rather than split off as its own cell.
pub const DEFAULT_MIN_FRAGMENT_SIZE: u32 = 32;

#[inline]
fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// Attempt a single first-fit pass starting at `*rover`. On success,
/// advances `*rover` past the new allocation and returns its offset. On
/// failure (the rover wraps all the way back around with no cell big
/// enough), returns `None` and leaves `*rover` unchanged.
///
/// # Safety
/// `arena` must be exclusively owned by the caller for the duration of this
/// call (i.e. the allocator mutex is held) — this function mutates cell
/// headers directly rather than just reading them.
pub unsafe fn try_allocate(
    arena: &Arena,
    deferred: &DeferredFreeProcessor,
    class_table: &dyn ClassTable,
    rover: &mut Offset,
    data_size: usize,
    object_flags: u8,
    min_fragment_size: u32,
) -> Option<Offset> {
    let requested = align_up(HEADER_SIZE + data_size, 8) as u32;
    let start = *rover;
    let mut current = start;
    let mut visited_start = false;

    loop {
        if visited_start && current == start {
            return None;
        }
        visited_start = true;

        let state = unsafe { arena.header(current) }.alloc_state();

        if state == AllocState::Allocated {
            current = wrap_next(arena, current);
            continue;
        }

        if state == AllocState::RefZero {
            // Run the deferred-free processor; the cell is FREE once this
            // returns. Fall through without advancing — we re-inspect the
            // same cell as a free candidate immediately.
            unsafe { deferred.process(arena, class_table, current) };
        }

        coalesce_forward(arena, current);

        let exact_size = unsafe { arena.header(current) }.exact_size();
        if exact_size < requested {
            current = wrap_next(arena, current);
            continue;
        }

        split_or_consume(arena, current, requested, data_size as u32, object_flags, min_fragment_size);
        *rover = wrap_next(arena, current);
        return Some(current);
    }
}

/// Merge `offset`'s cell with any immediately following `FREE` cells,
/// in place. Stops at the first non-free neighbour or at the arena end.
fn coalesce_forward(arena: &Arena, offset: Offset) {
    loop {
        let size = unsafe { arena.header(offset) }.exact_size();
        let next_offset = offset as usize + size as usize;
        if next_offset >= arena.len() {
            break;
        }
        let next_offset = next_offset as Offset;
        if unsafe { arena.header(next_offset) }.alloc_state() != AllocState::Free {
            break;
        }
        let combined = size + unsafe { arena.header(next_offset) }.exact_size();
        unsafe { arena.header_mut(offset).init_free(combined) };
    }
}

/// `offset` names a `FREE` cell with `exact_size >= requested`. Either
/// split off the leftover as a new free cell (if it clears the minimum
/// fragment floor) or absorb it whole into the allocation.
fn split_or_consume(
    arena: &Arena,
    offset: Offset,
    requested: u32,
    data_size: u32,
    object_flags: u8,
    min_fragment_size: u32,
) {
    let total = unsafe { arena.header(offset) }.exact_size();
    let surplus = total - requested;

    if surplus < min_fragment_size {
        unsafe { arena.header_mut(offset).init_allocated(total, object_flags, data_size) };
    } else {
        unsafe { arena.header_mut(offset).init_allocated(requested, object_flags, data_size) };
        let free_offset = offset + requested;
        unsafe { arena.header_mut(free_offset).init_free(surplus) };
    }

    unsafe { arena.zero_data(offset, data_size as usize) };
}
