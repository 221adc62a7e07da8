//! The `Heap` facade (§4.H): the one type a VM embedder talks to.
//!
//! Everything else in this crate is a free function or a small stateless
//! helper operating on an [`Arena`](crate::cell::Arena) passed in by
//! reference. `Heap` is where those pieces come together: it owns the
//! arena, the allocator's rover, the root registry, the deferred-free
//! processor, and the collector, and serializes access to all of them
//! behind a single `alloc_mutex`.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use crate::allocator::{self, DEFAULT_MIN_FRAGMENT_SIZE};
use crate::cell::{AllocState, Arena, Offset};
use crate::collector::{Collector, DataSegmentScanner, NullScanner};
use crate::deferred_free::DeferredFreeProcessor;
use crate::error::{fatal, HeapError, HeapResult};
use crate::refcount::{self, DecOutcome};
use crate::roots::{DynamicRoots, StaticRoots};
use crate::trace::ClassTable;
use crate::walker;

/// Tunables governing the allocator and collector. Constructed explicitly
/// by the embedder — there is no on-disk config format; the heap has no
/// filesystem concerns of its own.
#[derive(Clone)]
pub struct HeapConfig {
    /// Leftover-free-space floor below which a split absorbs the surplus.
    pub min_fragment_size: u32,
    /// Bound on the collector's mark-area work stack.
    pub mark_area_capacity: usize,
    /// Bound on the dynamic root registry.
    pub dynamic_root_capacity: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        HeapConfig {
            min_fragment_size: DEFAULT_MIN_FRAGMENT_SIZE,
            mark_area_capacity: 1_000_000,
            dynamic_root_capacity: 1_000_000,
        }
    }
}

/// Structural report produced by [`Heap::memcheck`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemcheckReport {
    /// Number of live (`ALLOCATED` or `REFZERO`) cells.
    pub objects: usize,
    /// Bytes occupied by live cells, headers included.
    pub used_bytes: usize,
    /// Bytes occupied by `FREE` cells.
    pub free_bytes: usize,
}

/// A cheap, lock-free snapshot of allocation counters for embedder-side
/// monitoring. Exposes no mutating capability; not bound by any Non-goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    /// Total successful allocations since construction.
    pub allocations: u64,
    /// Total collection cycles run since construction.
    pub collections: u64,
    /// Current generation counter.
    pub generation: u8,
}

/// The external thread supervisor seam: stop-the-world collection needs
/// every mutator paused before phase 1 and resumed after phase 2, and this
/// crate has no notion of "thread" of its own. Production embedders supply
/// a real implementation; [`NullSupervisor`] treats the calling thread as
/// the only mutator, for single-threaded tests and tools.
pub trait MutatorSupervisor: Send + Sync {
    /// Block until every mutator thread has stopped.
    fn pause_all(&self);
    /// Re-enable mutator threads after a collection cycle.
    fn resume_all(&self);
}

/// No-op supervisor for single-threaded use.
pub struct NullSupervisor;

impl MutatorSupervisor for NullSupervisor {
    fn pause_all(&self) {}
    fn resume_all(&self) {}
}

struct AllocatorState {
    rover: Offset,
}

/// The persistent object heap: arena, locks, rover, roots, and collector
/// behind one facade.
pub struct Heap {
    arena: Arena,
    config: HeapConfig,
    alloc_mutex: Mutex<AllocatorState>,
    deferred: DeferredFreeProcessor,
    static_roots: StaticRoots,
    dynamic_roots: DynamicRoots,
    collector: Collector,
    class_table: Box<dyn ClassTable>,
    scanner: Box<dyn DataSegmentScanner>,
    supervisor: Box<dyn MutatorSupervisor>,
    // Cache-padded so the hot allocation counter doesn't false-share a
    // cache line with the far-colder collection counter.
    allocations: CachePadded<AtomicU64>,
    collections: CachePadded<AtomicU64>,
    current_generation: Mutex<u8>,
}

impl Heap {
    /// Construct a heap over externally supplied memory — a persistent or
    /// snapshotted region the caller owns for at least as long as `Heap`
    /// lives. Writes a single `FREE` cell covering the whole region unless
    /// `reuse_existing` is set, in which case the region is assumed to
    /// already hold a valid, previously-initialized heap (e.g. a restored
    /// snapshot), and the current generation is read back from cell 0
    /// rather than reset to 0.
    ///
    /// # Safety
    /// `start` must be non-null and valid for reads and writes of `len`
    /// bytes for the lifetime of `Heap`.
    pub unsafe fn init(
        start: *mut u8,
        len: usize,
        static_roots: StaticRoots,
        class_table: Box<dyn ClassTable>,
        scanner: Box<dyn DataSegmentScanner>,
        supervisor: Box<dyn MutatorSupervisor>,
        config: HeapConfig,
        reuse_existing: bool,
    ) -> Self {
        let arena = unsafe { Arena::from_raw(start, len) };
        let generation = if reuse_existing {
            unsafe { arena.header(0) }.generation()
        } else {
            unsafe { arena.header_mut(0).init_free(len as u32) };
            0
        };

        Heap {
            arena,
            alloc_mutex: Mutex::new(AllocatorState { rover: 0 }),
            deferred: DeferredFreeProcessor::new(),
            dynamic_roots: DynamicRoots::new(config.dynamic_root_capacity),
            collector: Collector::new(config.mark_area_capacity),
            static_roots,
            class_table,
            scanner,
            supervisor,
            allocations: CachePadded::new(AtomicU64::new(0)),
            collections: CachePadded::new(AtomicU64::new(0)),
            current_generation: Mutex::new(generation),
            config,
        }
    }

    /// Construct a heap over an owned, in-process buffer. Convenient for
    /// tests and tooling that have no persistent region to map.
    pub fn new_owned(
        len: usize,
        static_roots: StaticRoots,
        class_table: Box<dyn ClassTable>,
        scanner: Box<dyn DataSegmentScanner>,
        supervisor: Box<dyn MutatorSupervisor>,
        config: HeapConfig,
    ) -> Self {
        let arena = Arena::new_owned(len);
        unsafe { arena.header_mut(0).init_free(len as u32) };

        Heap {
            arena,
            alloc_mutex: Mutex::new(AllocatorState { rover: 0 }),
            deferred: DeferredFreeProcessor::new(),
            dynamic_roots: DynamicRoots::new(config.dynamic_root_capacity),
            collector: Collector::new(config.mark_area_capacity),
            static_roots,
            class_table,
            scanner,
            supervisor,
            allocations: CachePadded::new(AtomicU64::new(0)),
            collections: CachePadded::new(AtomicU64::new(0)),
            current_generation: Mutex::new(0),
            config,
        }
    }

    /// A minimal heap for tests that don't care about class tables,
    /// scanning, or multithreaded supervision.
    pub fn for_tests(len: usize) -> Self {
        Heap::new_owned(
            len,
            StaticRoots::new(Vec::new()),
            Box::new(crate::trace::NullClassTable),
            Box::new(NullScanner),
            Box::new(NullSupervisor),
            HeapConfig::default(),
        )
    }

    /// Reinitialise the arena to a single `FREE` cell, destroying all
    /// contents. Does not touch the dynamic root registry — an embedder
    /// calling this is expected to also drop any pinned handles.
    pub fn clear(&self) {
        let mut state = self.alloc_mutex.lock();
        unsafe { self.arena.header_mut(0).init_free(self.arena.len() as u32) };
        state.rover = 0;
        *self.current_generation.lock() = 0;
    }

    /// Allocate a cell of `data_size` bytes carrying `object_flags`.
    /// Retries once, through a forced collection, if the first pass finds
    /// no room; fatal (`OUT_OF_MEMORY`) if the retry also fails.
    pub fn allocate(&self, data_size: usize, object_flags: u8) -> Offset {
        let mut state = self.alloc_mutex.lock();

        if let Some(offset) = unsafe {
            allocator::try_allocate(
                &self.arena,
                &self.deferred,
                self.class_table.as_ref(),
                &mut state.rover,
                data_size,
                object_flags,
                self.config.min_fragment_size,
            )
        } {
            self.allocations.fetch_add(1, Ordering::Relaxed);
            return offset;
        }

        tracing::debug!(data_size, "allocator exhausted, forcing collection");
        drop(state);
        self.run_collection();
        let mut state = self.alloc_mutex.lock();

        match unsafe {
            allocator::try_allocate(
                &self.arena,
                &self.deferred,
                self.class_table.as_ref(),
                &mut state.rover,
                data_size,
                object_flags,
                self.config.min_fragment_size,
            )
        } {
            Some(offset) => {
                self.allocations.fetch_add(1, Ordering::Relaxed);
                offset
            }
            None => fatal(HeapError::OutOfMemory {
                requested: data_size,
                available: self.arena.len(),
            }),
        }
    }

    /// Run one stop-the-world collection cycle, matching §4.F's two-phase
    /// mutex/supervisor contract: phase 1 (mark) runs with every mutator
    /// paused and does not need `alloc_mutex` (nothing else can be running).
    /// Mutators are then resumed *before* phase 2 starts, and phase 2
    /// (sweep) reacquires `alloc_mutex` for its duration so the allocator
    /// cannot race the sweep's reads and writes of cell headers.
    fn run_collection(&self) {
        self.supervisor.pause_all();

        let mut generation = self.current_generation.lock();
        let new_generation = (*generation + 1) % crate::cell::GENERATION_MODULUS;

        let mut roots: Vec<Offset> = self.static_roots.iter().collect();
        roots.extend(self.dynamic_roots.snapshot());

        let span = tracing::info_span!("gc_collect", generation = new_generation);
        let _enter = span.enter();

        unsafe {
            self.collector.mark(
                &self.arena,
                self.class_table.as_ref(),
                new_generation,
                &roots,
                self.scanner.as_ref(),
            )
        };

        self.supervisor.resume_all();

        let freed_cells = {
            let _state = self.alloc_mutex.lock();
            unsafe { self.collector.sweep(&self.arena, new_generation) }
        };

        *generation = new_generation;
        unsafe { self.arena.header(0).set_generation(new_generation) };
        drop(generation);

        self.collections.fetch_add(1, Ordering::Relaxed);
        tracing::info!(freed = freed_cells, generation = new_generation, "collection complete");
    }

    /// Increment `offset`'s refcount.
    ///
    /// # Safety
    /// `offset` must name an `ALLOCATED` cell in this heap's arena.
    pub unsafe fn inc(&self, offset: Offset) {
        unsafe { refcount::inc(&self.arena, offset) };
    }

    /// Decrement `offset`'s refcount. Returns the outcome; a `REFZERO`
    /// result is left for the allocator's next pass to reclaim — this does
    /// not itself run the deferred-free processor.
    ///
    /// # Safety
    /// `offset` must name an `ALLOCATED` cell in this heap's arena.
    pub unsafe fn dec(&self, offset: Offset) -> DecOutcome {
        unsafe { refcount::dec(&self.arena, offset) }
    }

    /// Pin `offset`'s refcount at its maximum, making it immortal.
    ///
    /// # Safety
    /// `offset` must name an `ALLOCATED` cell in this heap's arena.
    pub unsafe fn saturate(&self, offset: Offset) {
        unsafe { refcount::saturate(&self.arena, offset) };
    }

    /// Pin `offset` as a dynamic root.
    pub fn add_root(&self, offset: Offset) -> HeapResult<()> {
        self.dynamic_roots.add(offset)
    }

    /// Unpin `offset` as a dynamic root.
    pub fn remove_root(&self, offset: Offset) {
        self.dynamic_roots.remove(offset);
    }

    /// Force a collection cycle regardless of allocator pressure.
    pub fn collect(&self) {
        self.run_collection();
    }

    /// Non-panicking structural walk of the arena: confirms every header
    /// carries the start marker and that cells tile the arena exactly.
    /// Returns the first structural anomaly as an `Err` rather than
    /// panicking — this is the crate's one fallible public entry point.
    pub fn memcheck(&self) -> HeapResult<MemcheckReport> {
        let _state = self.alloc_mutex.lock();
        let mut report = MemcheckReport::default();
        let mut offset: Offset = 0;

        loop {
            let header = unsafe { self.arena.header(offset) };
            if !header.is_object() {
                return Err(HeapError::CorruptHeap {
                    offset: offset as usize,
                    reason: "missing start marker during memcheck".into(),
                });
            }

            match header.alloc_state() {
                AllocState::Free => report.free_bytes += header.exact_size() as usize,
                AllocState::Allocated | AllocState::RefZero => {
                    report.objects += 1;
                    report.used_bytes += header.exact_size() as usize;
                }
            }

            let end = offset as usize + header.exact_size() as usize;
            if end == self.arena.len() {
                return Ok(report);
            }
            if end > self.arena.len() {
                return Err(HeapError::CorruptHeap {
                    offset: offset as usize,
                    reason: "cell overshoots arena end during memcheck".into(),
                });
            }
            offset = match walker::next(&self.arena, offset) {
                Some(next) => next,
                None => return Ok(report),
            };
        }
    }

    /// Cheap, lock-free snapshot of allocation counters.
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            collections: self.collections.load(Ordering::Relaxed),
            generation: *self.current_generation.lock(),
        }
    }

    /// Byte length of the backing arena.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Read-only access to the underlying arena, for embedders that need
    /// to read a cell's data area directly (e.g. to interpret payload
    /// bytes after locating a cell via [`Heap::allocate`]'s returned
    /// offset).
    pub fn arena(&self) -> &Arena {
        &self.arena
    }
}
