//! The producer side of the ring buffer: claiming and publishing sequences.
//!
//! A sequencer owns the cursor, the capacity, the wait strategy and the set of
//! gating sequences. Producers claim sequences with `next`, write the slots
//! and then `publish` them; consumers learn what is readable through
//! [`Sequencer::highest_published_sequence`].
//!
//! Two algorithms implement the trait:
//!
//! - [`SingleProducerSequencer`](crate::SingleProducerSequencer): one
//!   producer thread, no atomic read-modify-write on the claim path.
//! - [`MultiProducerSequencer`](crate::MultiProducerSequencer): any number
//!   of producer threads racing on a compare-and-set of the cursor, with an
//!   availability table so out-of-order publishes stay invisible until the
//!   gap before them is filled.

use crate::error::{Error, Result};
use crate::sequence::{INITIAL_CURSOR_VALUE, Sequence};
use crate::sequence_group::SequenceGroup;
use crate::wait_strategy::WaitStrategy;
use std::fmt;
use std::sync::Arc;

/// Coordinates claiming and publishing of ring buffer sequences.
pub trait Sequencer: Send + Sync + fmt::Debug {
    /// Number of slots in the ring.
    fn buffer_size(&self) -> usize;

    /// Current cursor value.
    fn cursor(&self) -> i64;

    /// The cursor itself, for barriers that wait on it.
    fn cursor_sequence(&self) -> &Arc<Sequence>;

    /// The wait strategy consumers of this sequencer idle with.
    fn wait_strategy(&self) -> &Arc<dyn WaitStrategy>;

    /// Whether `required` more slots could be claimed without waiting.
    fn has_available_capacity(&self, required: usize) -> bool;

    /// Number of slots that can be claimed right now.
    fn remaining_capacity(&self) -> i64;

    /// Claims the next sequence, waiting while the ring is full.
    fn next(&self) -> Result<i64> {
        self.next_n(1)
    }

    /// Claims the next `n` contiguous sequences and returns the highest.
    ///
    /// Fails with [`Error::InvalidArgument`] unless `1 <= n <= buffer_size`.
    fn next_n(&self, n: usize) -> Result<i64>;

    /// Claims the next sequence, failing with
    /// [`Error::InsufficientCapacity`] instead of waiting.
    fn try_next(&self) -> Result<i64> {
        self.try_next_n(1)
    }

    /// Non-blocking form of [`Sequencer::next_n`].
    fn try_next_n(&self, n: usize) -> Result<i64>;

    /// Moves the claim position to `sequence` without publishing anything.
    ///
    /// Only safe while no producer or consumer is active; meant for
    /// initialisation and tests.
    fn claim(&self, sequence: i64);

    /// Makes `sequence` visible to consumers.
    fn publish(&self, sequence: i64);

    /// Makes every sequence in `low..=high` visible to consumers.
    fn publish_range(&self, low: i64, high: i64);

    /// Whether `sequence` has been published and not yet overwritten.
    fn is_available(&self, sequence: i64) -> bool;

    /// Registers consumer sequences that producers must not overtake.
    ///
    /// Each one is moved to the current cursor as it is registered.
    fn add_gating_sequences(&self, sequences: &[Arc<Sequence>]);

    /// Unregisters a gating sequence. Returns whether it was registered.
    fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool;

    /// Minimum of the gating sequences and the cursor.
    fn minimum_sequence(&self) -> i64;

    /// Highest sequence in `lower_bound..=available` such that every sequence
    /// from `lower_bound` up to it is published. Returns `lower_bound - 1`
    /// when `lower_bound` itself is not published yet.
    fn highest_published_sequence(&self, lower_bound: i64, available: i64) -> i64;
}

/// State shared by both sequencer algorithms.
#[derive(Debug)]
pub(crate) struct SequencerCore {
    pub(crate) buffer_size: usize,
    pub(crate) wait_strategy: Arc<dyn WaitStrategy>,
    pub(crate) cursor: Arc<Sequence>,
    pub(crate) gating_sequences: SequenceGroup,
}

impl SequencerCore {
    pub(crate) fn new(buffer_size: usize, wait_strategy: Arc<dyn WaitStrategy>) -> Result<Self> {
        if buffer_size < 1 {
            return Err(Error::invalid_argument("bufferSize must not be less than 1"));
        }
        if !buffer_size.is_power_of_two() {
            return Err(Error::invalid_argument(format!(
                "bufferSize must be a power of 2, got {buffer_size}"
            )));
        }
        if i64::try_from(buffer_size).is_err() {
            return Err(Error::invalid_argument(format!(
                "bufferSize {buffer_size} does not fit a sequence"
            )));
        }

        Ok(Self {
            buffer_size,
            wait_strategy,
            cursor: Arc::new(Sequence::new(INITIAL_CURSOR_VALUE)),
            gating_sequences: SequenceGroup::new(),
        })
    }

    /// Capacity as a signed sequence delta. Checked to fit at construction.
    #[inline]
    pub(crate) fn size(&self) -> i64 {
        self.buffer_size as i64
    }

    /// Validates a batch size and converts it to a sequence delta.
    #[inline]
    pub(crate) fn batch(&self, n: usize) -> Result<i64> {
        if n < 1 || n > self.buffer_size {
            return Err(Error::invalid_argument(format!(
                "n must be > 0 and <= bufferSize ({}), got {n}",
                self.buffer_size
            )));
        }
        Ok(n as i64)
    }

    pub(crate) fn add_gating_sequences(&self, sequences: &[Arc<Sequence>]) {
        let cursor = &self.cursor;
        self.gating_sequences
            .add_all(sequences, || Some(cursor.get()));
    }
}
