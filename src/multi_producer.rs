//! Claim and publish for any number of concurrent producer threads.
//!
//! Producers race on a compare-and-set of the cursor, so every claim gets a
//! disjoint range of sequences. Because the cursor moves at claim time rather
//! than publish time, it cannot tell consumers what is readable. That job
//! falls to the availability table: one slot per ring index, holding the
//! number of the lap (`sequence >> log2(buffer_size)`) that last published
//! it. A consumer scans the table forward from the first sequence it wants and
//! stops at the first slot still on an older lap.

use crate::error::{Error, Result};
use crate::sequence::{INITIAL_CURSOR_VALUE, Sequence};
use crate::sequencer::{Sequencer, SequencerCore};
use crate::util::log2;
use crate::wait_strategy::WaitStrategy;
use crossbeam_utils::Backoff;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

/// Sequencer that is safe to share between producer threads.
pub struct MultiProducerSequencer {
    core: SequencerCore,
    /// Last observed minimum of the gating sequences.
    gating_sequence_cache: Sequence,
    available_buffer: Box<[AtomicI32]>,
    index_mask: i64,
    index_shift: u32,
}

impl MultiProducerSequencer {
    pub fn new(buffer_size: usize, wait_strategy: Arc<dyn WaitStrategy>) -> Result<Self> {
        let core = SequencerCore::new(buffer_size, wait_strategy)?;

        let mut available_buffer = Vec::new();
        available_buffer
            .try_reserve_exact(buffer_size)
            .map_err(|_| Error::StorageAllocation {
                capacity: buffer_size,
            })?;
        available_buffer.extend((0..buffer_size).map(|_| AtomicI32::new(-1)));

        Ok(Self {
            index_mask: core.size() - 1,
            index_shift: log2(buffer_size),
            core,
            gating_sequence_cache: Sequence::new(INITIAL_CURSOR_VALUE),
            available_buffer: available_buffer.into_boxed_slice(),
        })
    }

    fn has_capacity(&self, required: i64, cursor_value: i64) -> bool {
        let wrap_point = (cursor_value + required) - self.core.size();
        let cached_gating_sequence = self.gating_sequence_cache.get();

        if wrap_point > cached_gating_sequence || cached_gating_sequence > cursor_value {
            let min_sequence = self.core.gating_sequences.minimum(cursor_value);
            self.gating_sequence_cache.set(min_sequence);

            if wrap_point > min_sequence {
                return false;
            }
        }

        true
    }

    #[inline]
    fn index(&self, sequence: i64) -> usize {
        (sequence & self.index_mask) as usize
    }

    #[inline]
    fn availability_flag(&self, sequence: i64) -> i32 {
        (sequence >> self.index_shift) as i32
    }

    #[inline]
    fn set_available(&self, sequence: i64) {
        self.available_buffer[self.index(sequence)]
            .store(self.availability_flag(sequence), Ordering::Release);
    }
}

impl fmt::Debug for MultiProducerSequencer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiProducerSequencer")
            .field("buffer_size", &self.core.buffer_size)
            .field("cursor", &self.core.cursor.get())
            .field("gating_sequences", &self.core.gating_sequences)
            .field("wait_strategy", &self.core.wait_strategy)
            .finish_non_exhaustive()
    }
}

impl Sequencer for MultiProducerSequencer {
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
        self.has_capacity(required, self.core.cursor.get())
    }

    fn remaining_capacity(&self) -> i64 {
        let produced = self.core.cursor.get();
        let consumed = self.core.gating_sequences.minimum(produced);
        self.core.size() - (produced - consumed)
    }

    fn next_n(&self, n: usize) -> Result<i64> {
        let n = self.core.batch(n)?;
        let backoff = Backoff::new();

        loop {
            let current = self.core.cursor.get();
            let next = current + n;
            let wrap_point = next - self.core.size();
            let cached_gating_sequence = self.gating_sequence_cache.get();

            if wrap_point > cached_gating_sequence || cached_gating_sequence > current {
                let gating_sequence = self.core.gating_sequences.minimum(current);
                if wrap_point > gating_sequence {
                    backoff.snooze();
                    continue;
                }
                self.gating_sequence_cache.set(gating_sequence);
            } else if self.core.cursor.compare_and_set(current, next) {
                return Ok(next);
            }
        }
    }

    fn try_next_n(&self, n: usize) -> Result<i64> {
        let n = self.core.batch(n)?;

        loop {
            let current = self.core.cursor.get();
            let next = current + n;
            if !self.has_capacity(n, current) {
                return Err(Error::InsufficientCapacity);
            }
            if self.core.cursor.compare_and_set(current, next) {
                return Ok(next);
            }
        }
    }

    fn claim(&self, sequence: i64) {
        self.core.cursor.set(sequence);
    }

    fn publish(&self, sequence: i64) {
        self.set_available(sequence);
        self.core.wait_strategy.signal_all_when_blocking();
    }

    fn publish_range(&self, low: i64, high: i64) {
        for sequence in low..=high {
            self.set_available(sequence);
        }
        self.core.wait_strategy.signal_all_when_blocking();
    }

    fn is_available(&self, sequence: i64) -> bool {
        self.available_buffer[self.index(sequence)].load(Ordering::Acquire)
            == self.availability_flag(sequence)
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

    fn highest_published_sequence(&self, lower_bound: i64, available: i64) -> i64 {
        (lower_bound..=available)
            .find(|&sequence| !self.is_available(sequence))
            .map_or(available, |gap| gap - 1)
    }
}
