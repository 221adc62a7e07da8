//! # phantom-heap
//!
//! A persistent object heap for a managed VM: a contiguous arena tiled by
//! fixed-header, variable-size cells, a first-fit rover allocator, an
//! eager reference-counting fast path, and a generational mark/sweep
//! collector as the backstop for reference cycles.
//!
//! ## Design
//!
//! - **Arena & cells** ([`cell`]) — the raw byte region and the 32-byte
//!   header every object begins with, addressed by byte offset rather
//!   than pointer so a heap can be relocated between process instances.
//! - **Allocation** ([`allocator`]) — a rover cursor doing first-fit
//!   search with forward coalescing and a minimum-fragment floor.
//! - **Reference counting** ([`refcount`], [`deferred_free`]) — O(1)
//!   atomic inc/dec with a lazily-triggered, worklist-based child walk on
//!   the zero transition.
//! - **Collection** ([`collector`]) — a stop-the-world, generation-stamping
//!   mark phase followed by a generation-comparing sweep; the only
//!   mechanism that reclaims reference cycles.
//! - **Roots** ([`roots`]) — the static VM-global list plus a
//!   spinlock-guarded dynamic pin registry.
//! - **Facade** ([`heap`]) — [`heap::Heap`], the single type an embedder
//!   constructs and drives.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod allocator;
pub mod cell;
pub mod collector;
pub mod deferred_free;
pub mod error;
pub mod heap;
pub mod refcount;
pub mod roots;
pub mod trace;
pub mod walker;

pub use cell::{AllocState, Arena, CellHeader, Offset, NULL_REF};
pub use collector::{CollectionStats, Collector, DataSegmentScanner, NullScanner};
pub use deferred_free::DeferredFreeProcessor;
pub use error::{fatal, HeapError, HeapResult};
pub use heap::{Heap, HeapConfig, HeapStats, MemcheckReport, MutatorSupervisor, NullSupervisor};
pub use refcount::DecOutcome;
pub use roots::{DynamicRoots, StaticRoots};
pub use trace::{ChildVisitor, ClassTable, NullClassTable, RefPair};
