//! A pre-allocated ring buffer for passing events between threads, in the
//! style of the LMAX Disruptor.
//!
//! Producers claim sequences from a [`Sequencer`], fill the matching slots of
//! a [`RingBuffer`] and publish them. Consumers run as processors on their own
//! threads and wait for published sequences through a [`SequenceBarrier`],
//! idling with a [`WaitStrategy`]. Every consumer's [`Sequence`] gates the
//! producers so no slot is overwritten before everyone has read it.
//!
//! ```rust,ignore
//! let ring = Arc::new(RingBuffer::new_single_producer(|| 0u64, 1024, Arc::new(BlockingWaitStrategy::new()))?);
//! let processor = BatchEventProcessor::new(ring.clone(), ring.new_barrier(&[]), handler);
//! ring.add_gating_sequences(&[processor.sequence()]);
//! let handle = spawn_processor(&ThreadExecutor::default(), processor)?;
//!
//! ring.publish_event(|event, _| *event = 42)?;
//! handle.halt();
//! ```

mod config;
mod error;
mod event_processor;
mod exception_handler;
mod executor;
mod handler;
mod multi_producer;
mod ring_buffer;
mod sequence;
mod sequence_barrier;
mod sequence_group;
mod sequencer;
mod single_producer;
mod util;
mod wait_strategy;
mod work_processor;
mod worker_pool;

pub use crate::config::{ProducerType, RingBufferConfig, WaitStrategyKind};
pub use crate::error::{Error, HandlerError, Result};
pub use crate::event_processor::{
    BatchEventProcessor, EventProcessor, ProcessorHandle, ProcessorState,
};
pub use crate::exception_handler::{
    ExceptionHandler, FatalExceptionHandler, IgnoreExceptionHandler, Recovery,
};
pub use crate::executor::{Executor, Task, ThreadExecutor, TokioExecutor, spawn_processor};
pub use crate::handler::{EventHandler, WorkHandler};
pub use crate::multi_producer::MultiProducerSequencer;
pub use crate::ring_buffer::{EventFactory, RingBuffer};
pub use crate::sequence::{INITIAL_CURSOR_VALUE, Sequence, SequenceView};
pub use crate::sequence_barrier::SequenceBarrier;
pub use crate::sequence_group::{FixedSequenceGroup, SequenceGroup};
pub use crate::sequencer::Sequencer;
pub use crate::single_producer::SingleProducerSequencer;
pub use crate::util::{ceiling_next_power_of_two, log2, minimum_sequence};
pub use crate::wait_strategy::{
    BlockingWaitStrategy, BusySpinWaitStrategy, SleepingWaitStrategy,
    TimeoutBlockingWaitStrategy, WaitStrategy, YieldingWaitStrategy,
};
pub use crate::work_processor::WorkProcessor;
pub use crate::worker_pool::WorkerPool;
