//! Mark-generation collector (§4.F): the cycle backstop.
//!
//! Reference counting ([`crate::refcount`], [`crate::deferred_free`])
//! reclaims everything that isn't part of a cycle, eagerly and without a
//! pause. This collector exists solely to close that one gap. It runs
//! stop-the-world, in two phases, and never mutates a refcount — a cell it
//! sweeps is simply turned `FREE` regardless of what its refcount says.
//!
//! Phase 1 stamps every reachable cell with the new generation in a single
//! forward sweep, using a bounded work stack (the "mark area") to handle
//! references that point backward relative to the sweep pointer. Phase 2
//! walks the arena again and frees any `ALLOCATED` cell whose generation is
//! now stale.

use rustc_hash::FxHashSet;

use crate::cell::{AllocState, Arena, Offset, GENERATION_MODULUS};
use crate::error::{fatal, HeapError};
use crate::trace::{self, ClassTable};
use crate::walker;

/// Supplies the host process's static data/BSS region for the conservative
/// scan that follows the main mark sweep. Environments that cannot locate
/// that region (ordinary test binaries, WASM) use [`NullScanner`], which
/// simply contributes no extra roots.
pub trait DataSegmentScanner: Send + Sync {
    /// `(start_address, byte_len)` of the region to scan, if known.
    fn region(&self) -> Option<(usize, usize)>;
}

/// A scanner with nothing to scan.
pub struct NullScanner;

impl DataSegmentScanner for NullScanner {
    fn region(&self) -> Option<(usize, usize)> {
        None
    }
}

/// Outcome of one collection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionStats {
    /// Cells turned `FREE` by the sweep phase.
    pub freed_cells: usize,
    /// Generation this cycle stamped onto every reachable cell.
    pub new_generation: u8,
}

/// The mark-generation algorithm. Stateless across calls other than its
/// configured mark-area capacity — `current_generation` is threaded through
/// by the caller ([`crate::heap::Heap`]), which is also responsible for
/// persisting it across the process lifetime.
pub struct Collector {
    mark_area_capacity: usize,
}

impl Collector {
    pub fn new(mark_area_capacity: usize) -> Self {
        Collector { mark_area_capacity }
    }

    /// Run one full collection cycle: phase 1 (mark) seeded from `roots`
    /// plus a conservative data-segment scan, then phase 2 (sweep).
    ///
    /// `current_generation` is the generation this cycle stamps onto every
    /// reachable cell — the caller must already have advanced it past the
    /// previous cycle's value.
    ///
    /// Convenience wrapper over [`Collector::mark`] followed by
    /// [`Collector::sweep`] with no mutex handling of its own — callers that
    /// must honor §4.F's "the sweep phase holds the mutex" contract (i.e.
    /// [`crate::heap::Heap`]) call `mark` and `sweep` separately instead, so
    /// the mutex can be reacquired and the mutator supervisor resumed
    /// between the two phases.
    ///
    /// # Safety
    /// Must be called with all mutator threads paused (the stop-the-world
    /// invariant is enforced by the caller via [`crate::heap::MutatorSupervisor`],
    /// not by this function).
    pub unsafe fn collect(
        &self,
        arena: &Arena,
        class_table: &dyn ClassTable,
        current_generation: u8,
        roots: &[Offset],
        scanner: &dyn DataSegmentScanner,
    ) -> CollectionStats {
        unsafe { self.mark(arena, class_table, current_generation, roots, scanner) };
        let freed_cells = unsafe { self.sweep(arena, current_generation) };
        CollectionStats {
            freed_cells,
            new_generation: current_generation,
        }
    }

    /// Phase 1 only: stamp every cell reachable from `roots`, plus whatever
    /// the conservative data-segment scan turns up, with `current_generation`.
    /// Mutators must be paused for the duration of this call.
    ///
    /// # Safety
    /// Same as [`Collector::collect`].
    pub unsafe fn mark(
        &self,
        arena: &Arena,
        class_table: &dyn ClassTable,
        current_generation: u8,
        roots: &[Offset],
        scanner: &dyn DataSegmentScanner,
    ) {
        unsafe { self.phase1_bump(arena, class_table, current_generation, roots) };

        let scanned = unsafe { self.scan_data_segment(arena, scanner) };
        if !scanned.is_empty() {
            unsafe { self.phase1_bump(arena, class_table, current_generation, &scanned) };
        }
    }

    /// Phase 2 only: free any `ALLOCATED` cell one or two generations stale
    /// relative to `current_generation`. Per §4.F, mutators are resumed
    /// before this phase runs and the allocator mutex is held for its
    /// duration so the allocator cannot race the sweep.
    ///
    /// # Safety
    /// Same as [`Collector::collect`].
    pub unsafe fn sweep(&self, arena: &Arena, current_generation: u8) -> usize {
        unsafe { self.phase2_sweep(arena, current_generation) }
    }

    /// Phase 1: stamp every cell reachable from `roots` with
    /// `current_generation`, in a single forward sweep with a bounded
    /// backfill stack for references pointing behind the sweep pointer.
    unsafe fn phase1_bump(&self, arena: &Arena, class_table: &dyn ClassTable, current_generation: u8, roots: &[Offset]) {
        let mut mark_area: Vec<Offset> = Vec::new();
        let mut sweep: Offset = 0;

        for &root in roots {
            self.seed(arena, root, sweep, current_generation, &mut mark_area);
        }

        loop {
            let header = unsafe { arena.header(sweep) };
            if header.alloc_state() != AllocState::Free
                && header.is_marked()
                && header.generation() != current_generation
            {
                unsafe { self.process_children(arena, class_table, sweep, sweep, current_generation, &mut mark_area) };
                header.clear_mark();
                header.set_generation(current_generation);
            }

            while let Some(cur) = mark_area.pop() {
                let h = unsafe { arena.header(cur) };
                if h.alloc_state() == AllocState::Free || h.generation() == current_generation {
                    continue;
                }
                unsafe { self.process_children(arena, class_table, cur, sweep, current_generation, &mut mark_area) };
                h.clear_mark();
                h.set_generation(current_generation);
            }

            match walker::next(arena, sweep) {
                Some(next) => sweep = next,
                None => break,
            }
        }
    }

    fn seed(&self, arena: &Arena, root: Offset, sweep: Offset, current_generation: u8, mark_area: &mut Vec<Offset>) {
        if trace::is_null(root) {
            return;
        }
        let header = unsafe { arena.header(root) };
        if header.generation() == current_generation {
            return;
        }
        if root > sweep {
            header.set_mark();
        } else {
            self.push_mark_area(root, mark_area);
        }
    }

    /// Visit `cell`'s outgoing references, marking or queueing each one
    /// relative to `sweep`. Unlike the deferred-free processor, this marks
    /// *both* `.data` and `.interface` fields of non-internal cells — a
    /// live interface pointer must keep its target reachable even though
    /// the refcount path never decrements it.
    unsafe fn process_children(
        &self,
        arena: &Arena,
        class_table: &dyn ClassTable,
        cell: Offset,
        sweep: Offset,
        current_generation: u8,
        mark_area: &mut Vec<Offset>,
    ) {
        let header = unsafe { arena.header(cell) };

        let mut children: Vec<Offset> = Vec::new();
        if header.is_internal() {
            if !header.is_leaf() {
                unsafe {
                    class_table.iter(arena, cell, &mut |child| children.push(child));
                }
            }
        } else {
            for pair in unsafe { trace::reference_pairs(arena, cell) } {
                children.push(pair.data);
                children.push(pair.interface);
            }
        }

        for child in children {
            if trace::is_null(child) {
                continue;
            }
            let child_header = unsafe { arena.header(child) };
            if child_header.generation() == current_generation {
                continue;
            }
            if child > sweep {
                child_header.set_mark();
            } else {
                self.push_mark_area(child, mark_area);
            }
        }
    }

    fn push_mark_area(&self, offset: Offset, mark_area: &mut Vec<Offset>) {
        if mark_area.len() >= self.mark_area_capacity {
            fatal(HeapError::MarkAreaOverflow {
                capacity: self.mark_area_capacity,
            });
        }
        mark_area.push(offset);
    }

    /// Walk the host's static data region looking for words that land on a
    /// validated cell boundary. The set of valid boundaries is built with
    /// one forward walk of the arena (the "header cache" — `rustc-hash`
    /// for speed, since this runs once per collection over a potentially
    /// large region) rather than re-validated per candidate.
    unsafe fn scan_data_segment(&self, arena: &Arena, scanner: &dyn DataSegmentScanner) -> Vec<Offset> {
        let Some((start_addr, len)) = scanner.region() else {
            return Vec::new();
        };

        let mut boundaries: FxHashSet<Offset> = FxHashSet::default();
        let mut offset: Offset = 0;
        boundaries.insert(offset);
        while let Some(next) = walker::next(arena, offset) {
            boundaries.insert(next);
            offset = next;
        }

        let word_size = std::mem::size_of::<usize>();
        let word_count = len / word_size;
        let mut found = Vec::new();
        for i in 0..word_count {
            let word_addr = start_addr + i * word_size;
            let candidate = unsafe { std::ptr::read_unaligned(word_addr as *const usize) };
            if let Some(offset) = arena.offset_of(candidate as *const u8) {
                if boundaries.contains(&offset) && unsafe { arena.header(offset) }.is_object() {
                    found.push(offset);
                }
            }
        }
        found
    }

    /// Phase 2: free any `ALLOCATED` cell whose generation is one or two
    /// cycles stale. Never frees a saturated or still-marked cell; finding
    /// the latter is a fatal invariant violation.
    unsafe fn phase2_sweep(&self, arena: &Arena, current_generation: u8) -> usize {
        let mut freed = 0;
        let mut offset: Offset = 0;

        loop {
            let header = unsafe { arena.header(offset) };
            if header.alloc_state() == AllocState::Allocated {
                let stale = is_stale(header.generation(), current_generation);
                if header.is_marked() {
                    if stale {
                        fatal(HeapError::CorruptHeap {
                            offset: offset as usize,
                            reason: "attempted to free a cell still carrying the MARK bit".into(),
                        });
                    }
                    header.clear_mark();
                }
                if stale && !header.is_saturated() {
                    header.set_alloc_state(AllocState::Free);
                    freed += 1;
                    tracing::trace!(offset, "collector freed stale cell");
                }
            }

            match walker::next(arena, offset) {
                Some(next) => offset = next,
                None => break,
            }
        }

        freed
    }
}

/// `true` if `generation` is exactly one or two cycles behind
/// `current_generation`, modulo the 16-generation wraparound.
fn is_stale(generation: u8, current_generation: u8) -> bool {
    let diff = (current_generation + GENERATION_MODULUS - generation) % GENERATION_MODULUS;
    diff == 1 || diff == 2
}
