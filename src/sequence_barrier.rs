use crate::error::{Error, Result};
use crate::sequence::{Sequence, SequenceView};
use crate::sequence_group::FixedSequenceGroup;
use crate::sequencer::Sequencer;
use crate::wait_strategy::WaitStrategy;
use crossbeam_utils::CachePadded;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// What a barrier's consumer must stay behind.
#[derive(Debug)]
enum Dependent {
    /// Only the producers.
    Cursor(Arc<Sequence>),
    /// Upstream consumer stages.
    Stages(FixedSequenceGroup),
}

impl SequenceView for Dependent {
    fn get(&self) -> i64 {
        match self {
            Dependent::Cursor(cursor) => cursor.get(),
            Dependent::Stages(group) => group.get(),
        }
    }
}

/// The consumer side of the ring buffer: waits until a sequence is published
/// and every upstream stage has processed it.
///
/// A barrier can be alerted to make every current and future wait fail with
/// [`Error::Alert`] until the alert is cleared. Processors use this to halt.
#[derive(Debug)]
pub struct SequenceBarrier {
    sequencer: Arc<dyn Sequencer>,
    wait_strategy: Arc<dyn WaitStrategy>,
    cursor: Arc<Sequence>,
    dependent: Dependent,
    alerted: CachePadded<AtomicBool>,
}

impl SequenceBarrier {
    /// Creates a barrier over `sequencer`. With no `dependents` the consumer
    /// only waits for producers.
    pub fn new(sequencer: Arc<dyn Sequencer>, dependents: &[Arc<Sequence>]) -> Self {
        let cursor = Arc::clone(sequencer.cursor_sequence());
        let wait_strategy = Arc::clone(sequencer.wait_strategy());
        let dependent = if dependents.is_empty() {
            Dependent::Cursor(Arc::clone(&cursor))
        } else {
            Dependent::Stages(FixedSequenceGroup::new(dependents))
        };

        Self {
            sequencer,
            wait_strategy,
            cursor,
            dependent,
            alerted: CachePadded::new(AtomicBool::new(false)),
        }
    }

    /// Waits until `sequence` can be consumed and returns the highest
    /// sequence that can, which may be greater than `sequence`.
    ///
    /// The result can also be *lower* than `sequence` when the wait strategy
    /// returns early; callers loop in that case.
    pub fn wait_for(&self, sequence: i64) -> Result<i64> {
        self.check_alert()?;

        let available =
            self.wait_strategy
                .wait_for(sequence, &self.cursor, &self.dependent, self)?;

        if available < sequence {
            return Ok(available);
        }

        Ok(self
            .sequencer
            .highest_published_sequence(sequence, available))
    }

    /// The sequence this barrier's consumer may read up to, ignoring
    /// unpublished gaps.
    pub fn cursor(&self) -> i64 {
        self.dependent.get()
    }

    pub fn is_alerted(&self) -> bool {
        self.alerted.load(Ordering::Acquire)
    }

    /// Alerts the barrier and wakes any consumer blocked on it.
    pub fn alert(&self) {
        self.alerted.store(true, Ordering::Release);
        self.wait_strategy.signal_all_when_blocking();
    }

    pub fn clear_alert(&self) {
        self.alerted.store(false, Ordering::Release);
    }

    /// Fails with [`Error::Alert`] if the barrier is alerted.
    pub fn check_alert(&self) -> Result<()> {
        if self.is_alerted() {
            return Err(Error::Alert);
        }
        Ok(())
    }
}
