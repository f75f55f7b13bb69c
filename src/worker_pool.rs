//! A pool of work processors that share one stream of events.
//!
//! Where several [`BatchEventProcessor`](crate::BatchEventProcessor)s each see
//! every event, the workers of a [`WorkerPool`] split the events between them:
//! each event is handled by exactly one worker. Use it to spread expensive,
//! order-independent work across threads.

use crate::error::{Error, Result};
use crate::event_processor::{EventProcessor, ProcessorHandle, ProcessorState};
use crate::exception_handler::ExceptionHandler;
use crate::executor::Executor;
use crate::handler::WorkHandler;
use crate::ring_buffer::{EventFactory, RingBuffer};
use crate::sequence::Sequence;
use crate::sequence_barrier::SequenceBarrier;
use crate::util::minimum_sequence;
use crate::wait_strategy::BlockingWaitStrategy;
use crate::work_processor::WorkProcessor;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;
use tracing::{error, info};

const DEFAULT_CAPACITY: usize = 1024;

const IDLE: u8 = 0;
const STARTED: u8 = 1;
const HALTED: u8 = 2;

/// Work processors sharing a work sequence over one ring buffer.
///
/// The pool is started once and halted once; a halted pool cannot be
/// restarted.
pub struct WorkerPool<E> {
    ring_buffer: Arc<RingBuffer<E>>,
    barrier: Arc<SequenceBarrier>,
    work_sequence: Arc<Sequence>,
    /// Taken by `start`.
    processors: Mutex<Vec<WorkProcessor<E>>>,
    handles: Vec<ProcessorHandle>,
    state: AtomicU8,
}

impl<E> WorkerPool<E>
where
    E: Send + Sync + 'static,
{
    /// Creates one worker per handler, all consuming through `barrier`.
    ///
    /// The worker sequences are not registered with the ring; pass
    /// [`WorkerPool::worker_sequences`] to
    /// [`RingBuffer::add_gating_sequences`] before publishing.
    pub fn new(
        ring_buffer: Arc<RingBuffer<E>>,
        barrier: SequenceBarrier,
        exception_handler: Arc<dyn ExceptionHandler<E>>,
        handlers: Vec<Box<dyn WorkHandler<E>>>,
    ) -> Self {
        let barrier = Arc::new(barrier);
        let work_sequence = Arc::new(Sequence::default());

        let processors: Vec<_> = handlers
            .into_iter()
            .map(|handler| {
                WorkProcessor::new(
                    Arc::clone(&ring_buffer),
                    Arc::clone(&barrier),
                    handler,
                    Arc::clone(&exception_handler),
                    Arc::clone(&work_sequence),
                )
            })
            .collect();
        let handles = processors.iter().map(|p| p.handle()).collect();

        Self {
            ring_buffer,
            barrier,
            work_sequence,
            processors: Mutex::new(processors),
            handles,
            state: AtomicU8::new(IDLE),
        }
    }

    /// Creates the pool together with its own multi-producer ring buffer of
    /// 1024 slots, using a [`BlockingWaitStrategy`]. The workers already gate
    /// the ring.
    pub fn with_event_factory(
        factory: impl EventFactory<E>,
        exception_handler: Arc<dyn ExceptionHandler<E>>,
        handlers: Vec<Box<dyn WorkHandler<E>>>,
    ) -> Result<Self> {
        let ring_buffer = Arc::new(RingBuffer::new_multi_producer(
            factory,
            DEFAULT_CAPACITY,
            Arc::new(BlockingWaitStrategy::new()),
        )?);
        let barrier = ring_buffer.new_barrier(&[]);
        let pool = Self::new(Arc::clone(&ring_buffer), barrier, exception_handler, handlers);
        ring_buffer.add_gating_sequences(&pool.worker_sequences());
        Ok(pool)
    }

    pub fn ring_buffer(&self) -> &Arc<RingBuffer<E>> {
        &self.ring_buffer
    }

    /// The sequence of every worker plus the shared work sequence, for
    /// producers to gate on.
    pub fn worker_sequences(&self) -> Vec<Arc<Sequence>> {
        self.handles
            .iter()
            .map(|handle| Arc::clone(handle.sequence()))
            .chain(std::iter::once(Arc::clone(&self.work_sequence)))
            .collect()
    }

    /// Starts every worker on `executor` and returns the ring to publish to.
    ///
    /// Workers begin after the current cursor. Fails with
    /// [`Error::InvalidArgument`] if the pool was already started. Halting is
    /// final here, so `start` after [`WorkerPool::halt`] fails the same way;
    /// build a new pool to run the handlers again.
    ///
    /// If the executor fails to start a worker, the pool is halted, the
    /// workers that never started stop gating the ring, and the executor's
    /// error is returned.
    pub fn start(&self, executor: &dyn Executor) -> Result<Arc<RingBuffer<E>>> {
        if let Err(state) =
            self.state
                .compare_exchange(IDLE, STARTED, Ordering::AcqRel, Ordering::Acquire)
        {
            let reason = if state == STARTED {
                "WorkerPool has already been started"
            } else {
                "WorkerPool has been halted and cannot be restarted"
            };
            return Err(Error::invalid_argument(reason));
        }

        let cursor = self.ring_buffer.cursor();
        self.work_sequence.set(cursor);
        for handle in &self.handles {
            handle.sequence().set(cursor);
        }
        self.barrier.clear_alert();

        let processors = std::mem::take(&mut *self.processors.lock());
        let workers = processors.len();
        for (started, mut processor) in processors.into_iter().enumerate() {
            let spawned = executor.execute(Box::new(move || {
                if let Err(error) = processor.run() {
                    error!(%error, "worker stopped with an error");
                }
            }));
            if let Err(error) = spawned {
                error!(%error, started, workers, "failed to start worker");
                self.abort_start(started);
                return Err(error);
            }
        }

        info!(workers, cursor, "worker pool started");
        Ok(Arc::clone(&self.ring_buffer))
    }

    /// Halts the pool after the executor started only the first `started`
    /// workers. The rest will never run, so they and the shared work sequence
    /// stop gating the ring; each started worker still gates the slot it is
    /// on through its own sequence.
    fn abort_start(&self, started: usize) {
        self.halt();
        for handle in &self.handles[started..] {
            self.ring_buffer.remove_gating_sequence(handle.sequence());
        }
        self.ring_buffer.remove_gating_sequence(&self.work_sequence);
    }

    /// Waits until the workers have consumed everything published so far,
    /// then halts them.
    ///
    /// Skips the wait if the pool was never started or every worker has
    /// already stopped, since nothing would drain the ring.
    pub fn drain_and_halt(&self) {
        let sequences = self.worker_sequences();
        while self.is_running()
            && self.ring_buffer.cursor() > minimum_sequence(&sequences, i64::MAX)
        {
            if self
                .handles
                .iter()
                .all(|handle| handle.state() == ProcessorState::Halted)
            {
                break;
            }
            thread::yield_now();
        }
        info!(cursor = self.ring_buffer.cursor(), "worker pool drained");
        self.halt();
    }

    /// Stops every worker after the event it is handling. Idempotent.
    pub fn halt(&self) {
        for handle in &self.handles {
            handle.halt();
        }
        if self.state.swap(HALTED, Ordering::AcqRel) != HALTED {
            info!("worker pool halted");
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == STARTED
    }
}

impl<E> fmt::Debug for WorkerPool<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.handles.len())
            .field("work_sequence", &self.work_sequence)
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
