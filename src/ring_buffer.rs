//! Defines `RingBuffer`, the pre-allocated event store producers and consumers
//! exchange events through.
//!
//! `RingBuffer` is a fixed-size, `UnsafeCell`-based circular buffer paired
//! with a [`Sequencer`]. Every slot is created once by an [`EventFactory`] and
//! reused forever, so publishing never allocates.
//!
//! All safety relies on sequences for coordination rather than on locks. A
//! producer claims a sequence before writing its slot, and consumers only read
//! a slot after the sequence has been published to them through a
//! [`SequenceBarrier`]. Consumers only ever get shared access to a published
//! event, so any number of them may read it at once.

use crate::config::{ProducerType, RingBufferConfig};
use crate::error::{Error, Result};
use crate::multi_producer::MultiProducerSequencer;
use crate::sequence::Sequence;
use crate::sequence_barrier::SequenceBarrier;
use crate::sequencer::Sequencer;
use crate::single_producer::SingleProducerSequencer;
use crate::wait_strategy::WaitStrategy;
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Creates the blank events a ring buffer is filled with.
///
/// Implemented for every `Fn() -> E`, so a closure or `Default::default`
/// works as a factory.
pub trait EventFactory<E> {
    fn new_instance(&self) -> E;
}

impl<E, F> EventFactory<E> for F
where
    F: Fn() -> E,
{
    fn new_instance(&self) -> E {
        self()
    }
}

/// A fixed-size circular buffer of pre-allocated events.
///
/// # Safety
///
/// `Send` and `Sync` are implemented `unsafe`ly, and their soundness rests on
/// these conventions:
///
/// 1.  **External coordination**: slot access is ordered by sequences, not by
///     the buffer. The buffer itself provides no synchronization.
/// 2.  **Single writer**: between a producer's claim of a sequence and its
///     publish, only that producer touches the slot. On a single-producer
///     ring, claims are serialized: a claim made while another is in
///     progress fails with [`Error::InvalidArgument`].
/// 3.  **Read after publish**: consumers only get shared access to a slot,
///     and only once a [`SequenceBarrier`] has reported its sequence as
///     available. A slot is only reused once every gating sequence has moved
///     past it.
///
/// The safe publishing helpers ([`RingBuffer::publish_event`] and friends)
/// and the processors uphold these rules; the `unsafe` accessors and raw
/// [`RingBuffer::publish`] leave them to the caller.
pub struct RingBuffer<E> {
    /// The array of slots storing the events. `UnsafeCell` provides interior mutability.
    slots: Box<[UnsafeCell<E>]>,

    /// A mask used to quickly map a sequence number to an array index.
    /// Its value is `capacity - 1`.
    index_mask: i64,

    sequencer: Arc<dyn Sequencer>,

    /// Set while a claim on a single-producer ring is in progress.
    producer_claim: Option<CachePadded<AtomicBool>>,
}

// SAFETY: The thread safety of `RingBuffer` is guaranteed by the sequence
// coordination described above. Events move between threads (`Send`) and are
// read from threads other than their writer (`Sync`).
unsafe impl<E: Send + Sync> Send for RingBuffer<E> {}
unsafe impl<E: Send + Sync> Sync for RingBuffer<E> {}

impl<E> RingBuffer<E> {
    /// Creates a ring buffer around an existing sequencer, filling every slot
    /// from `factory`.
    ///
    /// Fails with [`Error::InvalidArgument`] unless the sequencer's buffer
    /// size is a power of two, and with [`Error::StorageAllocation`] if the
    /// slots cannot be allocated.
    ///
    /// # Safety
    ///
    /// The publishing helpers write through every sequence the sequencer
    /// hands out. The sequencer must never hand out a sequence that another
    /// caller still holds, and must never report a sequence as published
    /// before the caller that claimed it published it. A sequencer that is
    /// only safe for one producer thread must only ever be claimed from one
    /// thread at a time.
    pub unsafe fn with_sequencer(
        factory: impl EventFactory<E>,
        sequencer: Arc<dyn Sequencer>,
    ) -> Result<Self> {
        Self::build(factory, sequencer, false)
    }

    fn build(
        factory: impl EventFactory<E>,
        sequencer: Arc<dyn Sequencer>,
        single_producer: bool,
    ) -> Result<Self> {
        let capacity = sequencer.buffer_size();
        if !capacity.is_power_of_two() || i64::try_from(capacity).is_err() {
            return Err(Error::invalid_argument(format!(
                "sequencer buffer size {capacity} is not a power of 2"
            )));
        }

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| Error::StorageAllocation { capacity })?;
        slots.extend((0..capacity).map(|_| UnsafeCell::new(factory.new_instance())));

        Ok(Self {
            slots: slots.into_boxed_slice(),
            index_mask: capacity as i64 - 1,
            sequencer,
            producer_claim: single_producer.then(|| CachePadded::new(AtomicBool::new(false))),
        })
    }

    /// Creates a ring buffer for a single producer thread.
    ///
    /// Fails with [`Error::InvalidArgument`] unless `capacity` is a power of
    /// two. Claiming from a second thread while a claim is in progress, or
    /// publishing from inside a `publish_event` update, fails with
    /// [`Error::InvalidArgument`] instead of handing out a slot twice.
    pub fn new_single_producer(
        factory: impl EventFactory<E>,
        capacity: usize,
        wait_strategy: Arc<dyn WaitStrategy>,
    ) -> Result<Self> {
        let sequencer = SingleProducerSequencer::new(capacity, wait_strategy)?;
        Self::build(factory, Arc::new(sequencer), true)
    }

    /// Creates a ring buffer that any number of producer threads may share.
    ///
    /// Fails with [`Error::InvalidArgument`] unless `capacity` is a power of
    /// two.
    pub fn new_multi_producer(
        factory: impl EventFactory<E>,
        capacity: usize,
        wait_strategy: Arc<dyn WaitStrategy>,
    ) -> Result<Self> {
        let sequencer = MultiProducerSequencer::new(capacity, wait_strategy)?;
        Self::build(factory, Arc::new(sequencer), false)
    }

    pub fn new(
        producer_type: ProducerType,
        factory: impl EventFactory<E>,
        capacity: usize,
        wait_strategy: Arc<dyn WaitStrategy>,
    ) -> Result<Self> {
        match producer_type {
            ProducerType::Single => Self::new_single_producer(factory, capacity, wait_strategy),
            ProducerType::Multi => Self::new_multi_producer(factory, capacity, wait_strategy),
        }
    }

    pub fn from_config(config: &RingBufferConfig, factory: impl EventFactory<E>) -> Result<Self> {
        config.validate()?;
        Self::new(
            config.producer_type,
            factory,
            config.capacity,
            config.wait_strategy.build(),
        )
    }

    #[inline]
    fn slot(&self, sequence: i64) -> *mut E {
        let index = (sequence & self.index_mask) as usize;
        // SAFETY: `index` is guaranteed by `index_mask` to be within the valid range of `slots`.
        unsafe { self.slots.get_unchecked(index).get() }
    }

    /// Shared access to the event at `sequence`.
    ///
    /// # Safety
    ///
    /// `sequence` must have been published and made available to the caller
    /// by a [`SequenceBarrier`], and no producer may have claimed it again
    /// (the caller's sequence must gate producers).
    #[inline]
    pub unsafe fn get(&self, sequence: i64) -> &E {
        unsafe { &*self.slot(sequence) }
    }

    /// Exclusive access to the event at `sequence`.
    ///
    /// # Safety
    ///
    /// The caller must have claimed `sequence` from this ring and not yet
    /// published it.
    #[allow(clippy::mut_from_ref)]
    #[inline]
    pub unsafe fn get_mut(&self, sequence: i64) -> &mut E {
        unsafe { &mut *self.slot(sequence) }
    }

    /// Total number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Highest published sequence as seen by the sequencer.
    pub fn cursor(&self) -> i64 {
        self.sequencer.cursor()
    }

    pub fn next(&self) -> Result<i64> {
        let _claim = self.begin_claim()?;
        self.sequencer.next()
    }

    pub fn next_n(&self, n: usize) -> Result<i64> {
        let _claim = self.begin_claim()?;
        self.sequencer.next_n(n)
    }

    pub fn try_next(&self) -> Result<i64> {
        let _claim = self.begin_claim()?;
        self.sequencer.try_next()
    }

    pub fn try_next_n(&self, n: usize) -> Result<i64> {
        let _claim = self.begin_claim()?;
        self.sequencer.try_next_n(n)
    }

    /// Makes a claimed sequence visible to consumers.
    ///
    /// # Safety
    ///
    /// `sequence` must have been claimed from this ring by the caller and its
    /// event fully written. On a single-producer ring publishing a sequence
    /// also publishes every earlier claim, so those must be written too.
    pub unsafe fn publish(&self, sequence: i64) {
        self.sequencer.publish(sequence);
    }

    /// Makes the claimed range `low..=high` visible to consumers.
    ///
    /// # Safety
    ///
    /// As for [`RingBuffer::publish`], for every sequence in the range.
    pub unsafe fn publish_range(&self, low: i64, high: i64) {
        self.sequencer.publish_range(low, high);
    }

    /// Whether the event at `sequence` is published and still in the ring.
    pub fn is_published(&self, sequence: i64) -> bool {
        self.sequencer.is_available(sequence)
    }

    pub fn has_available_capacity(&self, required: usize) -> bool {
        self.sequencer.has_available_capacity(required)
    }

    pub fn remaining_capacity(&self) -> i64 {
        self.sequencer.remaining_capacity()
    }

    pub fn add_gating_sequences(&self, sequences: &[Arc<Sequence>]) {
        self.sequencer.add_gating_sequences(sequences);
    }

    pub fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool {
        self.sequencer.remove_gating_sequence(sequence)
    }

    /// Slowest gating sequence, or the cursor when nothing gates.
    pub fn minimum_gating_sequence(&self) -> i64 {
        self.sequencer.minimum_sequence()
    }

    /// Creates a barrier for a consumer that must stay behind `dependents`
    /// (or just behind the producers when `dependents` is empty).
    pub fn new_barrier(&self, dependents: &[Arc<Sequence>]) -> SequenceBarrier {
        SequenceBarrier::new(Arc::clone(&self.sequencer), dependents)
    }

    /// Claims a slot, lets `update` fill it and publishes it.
    ///
    /// Waits while the ring is full. The slot is published even if `update`
    /// panics midway, so consumers are never stuck behind a lost sequence.
    pub fn publish_event(&self, update: impl FnOnce(&mut E, i64)) -> Result<i64> {
        let _claim = self.begin_claim()?;
        let sequence = self.sequencer.next()?;
        self.translate_and_publish(sequence, update);
        Ok(sequence)
    }

    /// Like [`RingBuffer::publish_event`], but fails with
    /// [`Error::InsufficientCapacity`] instead of waiting.
    pub fn try_publish_event(&self, update: impl FnOnce(&mut E, i64)) -> Result<i64> {
        let _claim = self.begin_claim()?;
        let sequence = self.sequencer.try_next()?;
        self.translate_and_publish(sequence, update);
        Ok(sequence)
    }

    /// Claims `n` contiguous slots, lets `update` fill each of them and
    /// publishes them together. Returns the highest sequence.
    pub fn publish_events(&self, n: usize, mut update: impl FnMut(&mut E, i64)) -> Result<i64> {
        let _claim = self.begin_claim()?;
        let high = self.sequencer.next_n(n)?;
        let low = high - n as i64 + 1;

        let _publish = PublishOnDrop {
            sequencer: self.sequencer.as_ref(),
            low,
            high,
        };
        for sequence in low..=high {
            // SAFETY: `low..=high` was claimed by this call and is not yet published.
            let event = unsafe { self.get_mut(sequence) };
            update(event, sequence);
        }
        Ok(high)
    }

    /// Serializes claims on a single-producer ring. A no-op for multi-producer
    /// rings.
    fn begin_claim(&self) -> Result<Option<ClaimGuard<'_>>> {
        let Some(claiming) = &self.producer_claim else {
            return Ok(None);
        };
        if claiming.swap(true, Ordering::Acquire) {
            return Err(Error::invalid_argument(
                "single-producer ring claimed while another claim is in progress",
            ));
        }
        Ok(Some(ClaimGuard(claiming)))
    }

    fn translate_and_publish(&self, sequence: i64, update: impl FnOnce(&mut E, i64)) {
        let _publish = PublishOnDrop {
            sequencer: self.sequencer.as_ref(),
            low: sequence,
            high: sequence,
        };
        // SAFETY: `sequence` was claimed by the caller and is not yet published.
        let event = unsafe { self.get_mut(sequence) };
        update(event, sequence);
    }
}

struct ClaimGuard<'a>(&'a AtomicBool);

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Publishes a claimed range when dropped, including during unwinding.
struct PublishOnDrop<'a> {
    sequencer: &'a dyn Sequencer,
    low: i64,
    high: i64,
}

impl Drop for PublishOnDrop<'_> {
    fn drop(&mut self) {
        self.sequencer.publish_range(self.low, self.high);
    }
}

impl<E> fmt::Debug for RingBuffer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("sequencer", &self.sequencer)
            .finish()
    }
}
