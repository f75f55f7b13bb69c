//! Claim and publish for exactly one producer thread.

use crate::error::{Error, Result};
use crate::sequence::{INITIAL_CURSOR_VALUE, Sequence};
use crate::sequencer::{Sequencer, SequencerCore};
use crate::wait_strategy::WaitStrategy;
use crossbeam_utils::{Backoff, CachePadded};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Sequencer for a single producer thread.
///
/// The claim pointer and the cached gating minimum are plain counters only
/// the producer touches, so claiming costs no atomic read-modify-write. The
/// cursor only moves on publish.
///
/// Calling `next`/`publish` from more than one thread at a time hands out
/// overlapping sequences; use
/// [`MultiProducerSequencer`](crate::MultiProducerSequencer) for that.
#[derive(Debug)]
pub struct SingleProducerSequencer {
    core: SequencerCore,
    /// Highest sequence claimed so far.
    next_value: CachePadded<AtomicI64>,
    /// Last observed minimum of the gating sequences.
    cached_value: CachePadded<AtomicI64>,
}

impl SingleProducerSequencer {
    pub fn new(buffer_size: usize, wait_strategy: Arc<dyn WaitStrategy>) -> Result<Self> {
        Ok(Self {
            core: SequencerCore::new(buffer_size, wait_strategy)?,
            next_value: CachePadded::new(AtomicI64::new(INITIAL_CURSOR_VALUE)),
            cached_value: CachePadded::new(AtomicI64::new(INITIAL_CURSOR_VALUE)),
        })
    }

    /// Checks whether `required` more slots fit, refreshing the cached gating
    /// minimum when it is stale.
    fn has_capacity(&self, required: i64, publish_cursor: bool) -> bool {
        let next_value = self.next_value.load(Ordering::Relaxed);
        let wrap_point = (next_value + required) - self.core.size();
        let cached_gating_sequence = self.cached_value.load(Ordering::Relaxed);

        if wrap_point > cached_gating_sequence || cached_gating_sequence > next_value {
            if publish_cursor {
                self.core.cursor.set_volatile(next_value);
            }

            let min_sequence = self.core.gating_sequences.minimum(next_value);
            self.cached_value.store(min_sequence, Ordering::Relaxed);

            if wrap_point > min_sequence {
                return false;
            }
        }

        true
    }
}

impl Sequencer for SingleProducerSequencer {
    fn buffer_size(&self) -> usize {
        self.core.buffer_size
    }

    fn cursor(&self) -> i64 {
        self.core.cursor.get()
    }

    fn cursor_sequence(&self) -> &Arc<Sequence> {
        &self.core.cursor
    }

    fn wait_strategy(&self) -> &Arc<dyn WaitStrategy> {
        &self.core.wait_strategy
    }

    fn has_available_capacity(&self, required: usize) -> bool {
        let Ok(required) = i64::try_from(required) else {
            return false;
        };
        self.has_capacity(required, false)
    }

    fn remaining_capacity(&self) -> i64 {
        let next_value = self.next_value.load(Ordering::Relaxed);
        let consumed = self.core.gating_sequences.minimum(next_value);
        self.core.size() - (next_value - consumed)
    }

    fn next_n(&self, n: usize) -> Result<i64> {
        let n = self.core.batch(n)?;

        let next_value = self.next_value.load(Ordering::Relaxed);
        let next_sequence = next_value + n;
        let wrap_point = next_sequence - self.core.size();
        let cached_gating_sequence = self.cached_value.load(Ordering::Relaxed);

        if wrap_point > cached_gating_sequence || cached_gating_sequence > next_value {
            // consumers must see everything published so far before we wait on them
            self.core.cursor.set_volatile(next_value);

            let backoff = Backoff::new();
            let mut min_sequence;
            loop {
                min_sequence = self.core.gating_sequences.minimum(next_value);
                if wrap_point <= min_sequence {
                    break;
                }
                backoff.snooze();
            }

            self.cached_value.store(min_sequence, Ordering::Relaxed);
        }

        self.next_value.store(next_sequence, Ordering::Relaxed);
        Ok(next_sequence)
    }

    fn try_next_n(&self, n: usize) -> Result<i64> {
        let n = self.core.batch(n)?;

        if !self.has_capacity(n, true) {
            return Err(Error::InsufficientCapacity);
        }

        let next_sequence = self.next_value.load(Ordering::Relaxed) + n;
        self.next_value.store(next_sequence, Ordering::Relaxed);
        Ok(next_sequence)
    }

    fn claim(&self, sequence: i64) {
        self.next_value.store(sequence, Ordering::Relaxed);
    }

    fn publish(&self, sequence: i64) {
        self.core.cursor.set(sequence);
        self.core.wait_strategy.signal_all_when_blocking();
    }

    fn publish_range(&self, _low: i64, high: i64) {
        self.publish(high);
    }

    fn is_available(&self, sequence: i64) -> bool {
        let current = self.core.cursor.get();
        sequence <= current && sequence > current - self.core.size()
    }

    fn add_gating_sequences(&self, sequences: &[Arc<Sequence>]) {
        self.core.add_gating_sequences(sequences);
    }

    fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool {
        self.core.gating_sequences.remove(sequence)
    }

    fn minimum_sequence(&self) -> i64 {
        self.core.gating_sequences.minimum(self.core.cursor.get())
    }

    fn highest_published_sequence(&self, _lower_bound: i64, available: i64) -> i64 {
        available
    }
}
