//! The progress counter every actor on the ring buffer publishes.
//!
//! A `Sequence` is written by exactly one actor (a producer's cursor, a
//! consumer's progress, a worker pool's claim counter) and read by any actor
//! that depends on it. Each one sits on its own cache line so that two
//! independently moving counters never false-share.

use crossbeam_utils::CachePadded;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// Value of a sequence before anything has been claimed or processed.
pub const INITIAL_CURSOR_VALUE: i64 = -1;

/// Read-only view of a sequence position.
///
/// Implemented by [`Sequence`] itself and by the sequence groups, which
/// report the minimum of their members. Wait strategies only ever need this view of the sequences
/// they watch.
pub trait SequenceView: Send + Sync + fmt::Debug {
    /// Current value, read with acquire ordering.
    fn get(&self) -> i64;
}

/// A cache-line padded atomic counter.
///
/// Reads use `Acquire` and writes use `Release`, so a consumer that observes
/// sequence `n` also observes every slot write the producer made before
/// publishing `n`.
pub struct Sequence {
    value: CachePadded<AtomicI64>,
}

impl Sequence {
    pub fn new(initial: i64) -> Self {
        Self {
            value: CachePadded::new(AtomicI64::new(initial)),
        }
    }

    #[inline]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    /// Store with sequentially consistent ordering.
    ///
    /// Used where a later load of a *different* sequence must not be
    /// reordered before this store.
    #[inline]
    pub fn set_volatile(&self, value: i64) {
        self.value.store(value, Ordering::SeqCst);
    }

    /// Atomically replaces `expected` with `value`. Returns whether the swap
    /// happened.
    #[inline]
    pub fn compare_and_set(&self, expected: i64, value: i64) -> bool {
        self.value
            .compare_exchange(expected, value, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub fn increment_and_get(&self) -> i64 {
        self.add_and_get(1)
    }

    #[inline]
    pub fn add_and_get(&self, delta: i64) -> i64 {
        self.value.fetch_add(delta, Ordering::AcqRel) + delta
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new(INITIAL_CURSOR_VALUE)
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Sequence").field(&self.get()).finish()
    }
}

impl SequenceView for Sequence {
    #[inline]
    fn get(&self) -> i64 {
        Sequence::get(self)
    }
}
