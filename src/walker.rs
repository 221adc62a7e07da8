//! Arena walker: cell-to-cell traversal.
//!
//! Every other component — the allocator's rover, the collector's sweep
//! pointer, `memcheck` — moves through the arena one cell at a time using
//! the two functions here. Keeping the traversal in one place means the
//! "did we overshoot `end`" check is written exactly once.

use crate::cell::{Arena, Offset};
use crate::error::{fatal, HeapError};

/// Compute the offset of the cell immediately following the one at
/// `offset`.
///
/// Returns `None` when that offset is exactly `arena.len()` — a clean
/// termination of a linear walk. A next-offset that would exceed
/// `arena.len()` is heap corruption and is fatal.
pub fn next(arena: &Arena, offset: Offset) -> Option<Offset> {
    let header = unsafe { arena.header(offset) };
    if !header.is_object() {
        fatal(HeapError::CorruptHeap {
            offset: offset as usize,
            reason: "missing start marker while walking arena".into(),
        });
    }
    let end = offset as usize + header.exact_size() as usize;
    if end == arena.len() {
        None
    } else if end > arena.len() {
        fatal(HeapError::CorruptHeap {
            offset: offset as usize,
            reason: format!(
                "cell overshoots arena end: offset {offset} + size {} > len {}",
                header.exact_size(),
                arena.len()
            ),
        });
    } else {
        Some(end as Offset)
    }
}

/// Like [`next`], but used only by the allocator's rover: wraps back to `0`
/// instead of terminating at `end`.
pub fn wrap_next(arena: &Arena, offset: Offset) -> Offset {
    match next(arena, offset) {
        Some(o) => o,
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::flags;

    #[test]
    fn next_terminates_at_exact_end() {
        let arena = Arena::new_owned(64);
        unsafe {
            arena.header_mut(0).init_free(64);
        }
        assert_eq!(next(&arena, 0), None);
    }

    #[test]
    fn next_advances_by_exact_size() {
        let arena = Arena::new_owned(128);
        unsafe {
            arena.header_mut(0).init_allocated(64, flags::STRING, 32);
            arena.header_mut(64).init_free(64);
        }
        assert_eq!(next(&arena, 0), Some(64));
        assert_eq!(next(&arena, 64), None);
    }

    #[test]
    fn wrap_next_returns_to_start_after_last_cell() {
        let arena = Arena::new_owned(64);
        unsafe {
            arena.header_mut(0).init_free(64);
        }
        assert_eq!(wrap_next(&arena, 0), 0);
    }

    #[test]
    #[should_panic(expected = "overshoots")]
    fn next_panics_on_overshoot() {
        let arena = Arena::new_owned(64);
        unsafe {
            arena.header_mut(0).init_free(128);
        }
        let _ = next(&arena, 0);
    }
}
