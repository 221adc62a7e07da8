//! Fatal and non-fatal error taxonomy for the heap.
//!
//! Almost every failure mode in this crate is a structural invariant
//! violation: there is no recovery path once a header is missing its start
//! marker or a marked cell is about to be freed. [`fatal`] is the single
//! choke point those conditions funnel through — it logs at `error` level
//! and then panics, so the diagnostic reaches both the tracing subscriber
//! and the process's panic output. The one genuinely recoverable outcome,
//! [`memcheck`](crate::heap::Heap::memcheck) finding a corrupt header during
//! a boot-time scan, is returned as a `Result` instead.

use thiserror::Error;

/// Everything that can go wrong in the heap, fatal or not.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HeapError {
    /// The allocator could not satisfy a request even after forcing a
    /// collection.
    #[error("out of memory: requested {requested} bytes, {available} available after gc")]
    OutOfMemory {
        /// Data bytes the caller asked for.
        requested: usize,
        /// Largest free run the allocator found on its retry pass.
        available: usize,
    },

    /// A header's start marker did not match the sentinel, the arena walker
    /// overshot `end`, or the sweep found a marked cell it was about to
    /// free.
    #[error("corrupt heap at offset {offset}: {reason}")]
    CorruptHeap {
        /// Byte offset of the offending cell.
        offset: usize,
        /// What specifically was wrong.
        reason: String,
    },

    /// The collector's mark area ran out of capacity mid-sweep.
    #[error("mark area overflow: capacity {capacity} exceeded during phase 1")]
    MarkAreaOverflow {
        /// Configured capacity that was exceeded.
        capacity: usize,
    },

    /// The dynamic root registry is full.
    #[error("dynamic root registry overflow: capacity {capacity} exceeded")]
    DynRootsOverflow {
        /// Configured capacity that was exceeded.
        capacity: usize,
    },

    /// A non-saturated cell's refcount would have gone negative.
    #[error("refcount underflow at offset {offset}")]
    RefcountUnderflow {
        /// Byte offset of the offending cell.
        offset: usize,
    },
}

/// Log `err` at `error` level and panic with its diagnostic text.
///
/// This is the only place in the crate that turns a [`HeapError`] into a
/// panic. Call sites construct the error, hand it here, and never return.
#[track_caller]
pub fn fatal(err: HeapError) -> ! {
    tracing::error!(error = %err, "fatal heap error");
    panic!("{err}");
}

/// Result alias for the one fallible public entry point (`memcheck`).
pub type HeapResult<T> = Result<T, HeapError>;
