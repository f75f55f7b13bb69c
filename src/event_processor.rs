//! Processors run a consumer loop over the ring buffer on a thread of their
//! own.
//!
//! Every processor moves through `Idle -> Running -> Halted`. `Halted` is
//! final: a halted processor cannot be run again, build a new one instead.
//! Because `run` takes the processor by `&mut` and blocks its thread, the
//! processor is controlled from outside through a cloneable
//! [`ProcessorHandle`].

use crate::error::{Error, HandlerError, Result};
use crate::exception_handler::{ExceptionHandler, FatalExceptionHandler, Recovery};
use crate::handler::EventHandler;
use crate::ring_buffer::RingBuffer;
use crate::sequence::Sequence;
use crate::sequence_barrier::SequenceBarrier;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, error};

/// Lifecycle state of a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessorState {
    Idle = 0,
    Running = 1,
    Halted = 2,
}

impl ProcessorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ProcessorState::Idle,
            1 => ProcessorState::Running,
            _ => ProcessorState::Halted,
        }
    }
}

#[derive(Debug)]
struct Control {
    state: AtomicU8,
    sequence: Arc<Sequence>,
    barrier: Arc<SequenceBarrier>,
}

/// Shared control over a processor that may be running on another thread.
#[derive(Debug, Clone)]
pub struct ProcessorHandle {
    control: Arc<Control>,
}

impl ProcessorHandle {
    pub(crate) fn new(sequence: Arc<Sequence>, barrier: Arc<SequenceBarrier>) -> Self {
        Self {
            control: Arc::new(Control {
                state: AtomicU8::new(ProcessorState::Idle as u8),
                sequence,
                barrier,
            }),
        }
    }

    /// The highest sequence the processor has finished with. Register it as
    /// a gating sequence, or as a dependent of a downstream barrier.
    pub fn sequence(&self) -> &Arc<Sequence> {
        &self.control.sequence
    }

    pub fn state(&self) -> ProcessorState {
        ProcessorState::from_u8(self.control.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == ProcessorState::Running
    }

    /// Asks the processor to stop after the event it is handling, and wakes
    /// it if it is waiting. Idempotent.
    pub fn halt(&self) {
        self.control
            .state
            .store(ProcessorState::Halted as u8, Ordering::Release);
        self.control.barrier.alert();
    }

    pub(crate) fn barrier(&self) -> &SequenceBarrier {
        &self.control.barrier
    }

    /// Moves `Idle -> Running`. Returns `Ok(false)` if the processor was
    /// halted before it ever ran.
    pub(crate) fn try_start(&self) -> Result<bool> {
        match self.control.state.compare_exchange(
            ProcessorState::Idle as u8,
            ProcessorState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(true),
            Err(state) if state == ProcessorState::Running as u8 => {
                Err(Error::invalid_argument("processor is already running"))
            }
            Err(_) => Ok(false),
        }
    }

    pub(crate) fn finish(&self) {
        self.control
            .state
            .store(ProcessorState::Halted as u8, Ordering::Release);
    }
}

/// A consumer loop that can be moved onto a thread and run until halted.
pub trait EventProcessor: Send {
    /// Control handle that stays usable once the processor has been moved.
    fn handle(&self) -> ProcessorHandle;

    /// Runs the loop on the calling thread until the processor is halted.
    ///
    /// Returns an error if the processor is already running, or if a handler
    /// failed and the exception handler chose [`Recovery::Halt`].
    fn run(&mut self) -> Result<()>;

    fn sequence(&self) -> Arc<Sequence> {
        Arc::clone(self.handle().sequence())
    }

    fn halt(&self) {
        self.handle().halt();
    }

    fn is_running(&self) -> bool {
        self.handle().is_running()
    }
}

/// Delivers every event, in order and in batches, to one [`EventHandler`].
pub struct BatchEventProcessor<E, H> {
    ring_buffer: Arc<RingBuffer<E>>,
    handler: H,
    exception_handler: Arc<dyn ExceptionHandler<E>>,
    handle: ProcessorHandle,
}

impl<E, H> BatchEventProcessor<E, H>
where
    E: Send + Sync,
    H: EventHandler<E>,
{
    /// Creates a processor that halts on the first handler failure (see
    /// [`FatalExceptionHandler`]).
    pub fn new(ring_buffer: Arc<RingBuffer<E>>, barrier: SequenceBarrier, handler: H) -> Self {
        Self {
            ring_buffer,
            handler,
            exception_handler: Arc::new(FatalExceptionHandler),
            handle: ProcessorHandle::new(Arc::new(Sequence::default()), Arc::new(barrier)),
        }
    }

    pub fn with_exception_handler(
        mut self,
        exception_handler: Arc<dyn ExceptionHandler<E>>,
    ) -> Self {
        self.exception_handler = exception_handler;
        self
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    fn notify_start(&mut self) {
        if let Err(error) = self.handler.on_start() {
            self.exception_handler.handle_on_start_exception(&error);
        }
    }

    fn notify_shutdown(&mut self) {
        if let Err(error) = self.handler.on_shutdown() {
            self.exception_handler.handle_on_shutdown_exception(&error);
        }
    }

    fn process_events(&mut self) -> Result<()> {
        let sequence = Arc::clone(self.handle.sequence());
        let mut next_sequence = sequence.get() + 1;

        while self.handle.is_running() {
            match self.handle.barrier().wait_for(next_sequence) {
                Ok(available) if available >= next_sequence => {
                    self.handler.on_batch_start(available - next_sequence + 1);

                    while next_sequence <= available {
                        // SAFETY: the barrier reported `next_sequence` as published and
                        // `sequence` gates producers until this processor moves past it.
                        let event = unsafe { self.ring_buffer.get(next_sequence) };
                        if let Err(error) =
                            self.handler
                                .on_event(event, next_sequence, next_sequence == available)
                        {
                            self.handle_event_failure(&sequence, next_sequence, event, error)?;
                        }
                        next_sequence += 1;
                    }

                    sequence.set(available);
                }
                Ok(_) => {}
                Err(Error::Timeout) => {
                    let current = sequence.get();
                    if let Err(error) = self.handler.on_timeout(current) {
                        let recovery =
                            self.exception_handler
                                .handle_event_exception(&error, current, None);
                        if recovery == Recovery::Halt {
                            return Err(Error::Handler {
                                sequence: current,
                                source: error,
                            });
                        }
                    }
                }
                Err(Error::Alert) => {
                    if !self.handle.is_running() {
                        break;
                    }
                    self.handle.barrier().clear_alert();
                }
                Err(error) => {
                    error!(%error, "event processor wait failed");
                    return Err(error);
                }
            }
        }

        Ok(())
    }

    fn handle_event_failure(
        &self,
        sequence: &Sequence,
        failed: i64,
        event: &E,
        error: HandlerError,
    ) -> Result<()> {
        match self
            .exception_handler
            .handle_event_exception(&error, failed, Some(event))
        {
            Recovery::Resume => {
                sequence.set(failed);
                Ok(())
            }
            Recovery::Halt => {
                sequence.set(failed - 1);
                Err(Error::Handler {
                    sequence: failed,
                    source: error,
                })
            }
        }
    }
}

impl<E, H> EventProcessor for BatchEventProcessor<E, H>
where
    E: Send + Sync,
    H: EventHandler<E>,
{
    fn handle(&self) -> ProcessorHandle {
        self.handle.clone()
    }

    fn run(&mut self) -> Result<()> {
        if !self.handle.try_start()? {
            debug!("event processor halted before it ran");
            self.notify_start();
            self.notify_shutdown();
            return Ok(());
        }

        self.handle.barrier().clear_alert();
        debug!(sequence = self.handle.sequence().get(), "event processor started");
        self.notify_start();

        let result = self.process_events();

        self.notify_shutdown();
        self.handle.finish();
        debug!(sequence = self.handle.sequence().get(), "event processor stopped");
        result
    }
}

impl<E, H> fmt::Debug for BatchEventProcessor<E, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchEventProcessor")
            .field("handle", &self.handle)
            .field("exception_handler", &self.exception_handler)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception_handler::IgnoreExceptionHandler;
    use crate::wait_strategy::{BlockingWaitStrategy, TimeoutBlockingWaitStrategy};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<(i64, i64, bool)>>>,
        fail_on: Option<i64>,
        timeouts: Arc<Mutex<Vec<i64>>>,
    }

    impl EventHandler<i64> for Recorder {
        fn on_event(
            &mut self,
            event: &i64,
            sequence: i64,
            end_of_batch: bool,
        ) -> Result<(), HandlerError> {
            if self.fail_on == Some(sequence) {
                return Err(format!("bad event {sequence}").into());
            }
            self.seen.lock().unwrap().push((sequence, *event, end_of_batch));
            Ok(())
        }

        fn on_timeout(&mut self, sequence: i64) -> Result<(), HandlerError> {
            self.timeouts.lock().unwrap().push(sequence);
            Ok(())
        }
    }

    fn ring(capacity: usize) -> Arc<RingBuffer<i64>> {
        Arc::new(
            RingBuffer::new_single_producer(|| 0i64, capacity, Arc::new(BlockingWaitStrategy::new()))
                .unwrap(),
        )
    }

    fn publish(ring: &RingBuffer<i64>, values: impl IntoIterator<Item = i64>) {
        for value in values {
            ring.publish_event(|event, _| *event = value).unwrap();
        }
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("condition should hold in time");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_processes_in_order_and_marks_end_of_batch() {
        let ring = ring(16);
        let recorder = Recorder::default();
        let seen = Arc::clone(&recorder.seen);

        let mut processor = BatchEventProcessor::new(ring.clone(), ring.new_barrier(&[]), recorder);
        let handle = processor.handle();
        ring.add_gating_sequences(&[handle.sequence().clone()]);

        // published before the processor starts, so they arrive as one batch
        publish(&ring, [10, 11, 12]);

        let worker = tokio::task::spawn_blocking(move || processor.run());
        wait_until(|| handle.sequence().get() == 2).await;

        publish(&ring, [13]);
        wait_until(|| handle.sequence().get() == 3).await;

        handle.halt();
        timeout(Duration::from_secs(5), worker)
            .await
            .expect("processor should stop after halt")
            .unwrap()
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![(0, 10, false), (1, 11, false), (2, 12, true), (3, 13, true)]
        );
        assert_eq!(handle.state(), ProcessorState::Halted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fatal_handler_stops_processor() {
        let ring = ring(16);
        let recorder = Recorder {
            fail_on: Some(1),
            ..Default::default()
        };
        let seen = Arc::clone(&recorder.seen);

        let mut processor = BatchEventProcessor::new(ring.clone(), ring.new_barrier(&[]), recorder);
        let handle = processor.handle();
        publish(&ring, [0, 1, 2]);

        let result = timeout(
            Duration::from_secs(5),
            tokio::task::spawn_blocking(move || processor.run()),
        )
        .await
        .expect("processor should stop on a fatal error")
        .unwrap();

        assert!(matches!(result, Err(Error::Handler { sequence: 1, .. })));
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(handle.sequence().get(), 0);
        assert_eq!(handle.state(), ProcessorState::Halted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_ignore_handler_skips_failed_event() {
        let ring = ring(16);
        let recorder = Recorder {
            fail_on: Some(1),
            ..Default::default()
        };
        let seen = Arc::clone(&recorder.seen);

        let mut processor = BatchEventProcessor::new(ring.clone(), ring.new_barrier(&[]), recorder)
            .with_exception_handler(Arc::new(IgnoreExceptionHandler));
        let handle = processor.handle();
        publish(&ring, [0, 1, 2]);

        let worker = tokio::task::spawn_blocking(move || processor.run());
        wait_until(|| handle.sequence().get() == 2).await;
        handle.halt();
        timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let sequences: Vec<i64> = seen.lock().unwrap().iter().map(|s| s.0).collect();
        assert_eq!(sequences, vec![0, 2]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timeout_reaches_handler() {
        let ring = Arc::new(
            RingBuffer::new_single_producer(
                || 0i64,
                8,
                Arc::new(TimeoutBlockingWaitStrategy::new(Duration::from_millis(5))),
            )
            .unwrap(),
        );
        let recorder = Recorder::default();
        let timeouts = Arc::clone(&recorder.timeouts);

        let mut processor = BatchEventProcessor::new(ring.clone(), ring.new_barrier(&[]), recorder);
        let handle = processor.handle();
        let worker = tokio::task::spawn_blocking(move || processor.run());

        wait_until(|| !timeouts.lock().unwrap().is_empty()).await;
        handle.halt();
        timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert!(timeouts.lock().unwrap().iter().all(|&s| s == -1));
    }

    #[test]
    fn test_halt_before_run_exits_early() {
        let ring = ring(8);
        let mut processor =
            BatchEventProcessor::new(ring.clone(), ring.new_barrier(&[]), Recorder::default());

        processor.halt();
        processor.halt();
        assert_eq!(processor.handle().state(), ProcessorState::Halted);

        publish(&ring, [1]);
        processor.run().unwrap();
        assert!(processor.handler().seen.lock().unwrap().is_empty());
        assert!(!processor.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_second_run_while_running_is_rejected() {
        let ring = ring(8);
        let mut processor =
            BatchEventProcessor::new(ring.clone(), ring.new_barrier(&[]), Recorder::default());
        let handle = processor.handle();

        let worker = tokio::task::spawn_blocking(move || processor.run());
        wait_until(|| handle.is_running()).await;
        assert!(matches!(handle.try_start(), Err(Error::InvalidArgument(_))));

        handle.halt();
        timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
