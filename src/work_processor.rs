use crate::error::{Error, HandlerError, Result};
use crate::event_processor::{EventProcessor, ProcessorHandle};
use crate::exception_handler::{ExceptionHandler, Recovery};
use crate::handler::WorkHandler;
use crate::ring_buffer::RingBuffer;
use crate::sequence::Sequence;
use crate::sequence_barrier::SequenceBarrier;
use std::fmt;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error};

/// One worker of a work queue.
///
/// All workers of a pool share a work sequence and race to claim the next
/// sequence from it with a compare-and-set, so each event is handled by
/// exactly one worker. The worker's own sequence only reports how far it has
/// got, for gating.
///
/// Workers of a pool share one barrier as well. A work processor therefore
/// never clears the barrier's alert; the pool does that when it starts.
pub struct WorkProcessor<E> {
    ring_buffer: Arc<RingBuffer<E>>,
    work_sequence: Arc<Sequence>,
    handler: Box<dyn WorkHandler<E>>,
    exception_handler: Arc<dyn ExceptionHandler<E>>,
    handle: ProcessorHandle,
}

impl<E> WorkProcessor<E>
where
    E: Send + Sync,
{
    pub fn new(
        ring_buffer: Arc<RingBuffer<E>>,
        barrier: Arc<SequenceBarrier>,
        handler: Box<dyn WorkHandler<E>>,
        exception_handler: Arc<dyn ExceptionHandler<E>>,
        work_sequence: Arc<Sequence>,
    ) -> Self {
        Self {
            ring_buffer,
            work_sequence,
            handler,
            exception_handler,
            handle: ProcessorHandle::new(Arc::new(Sequence::default()), barrier),
        }
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

    fn fail(&self, error: HandlerError, sequence: i64, event: Option<&E>) -> Result<()> {
        match self
            .exception_handler
            .handle_event_exception(&error, sequence, event)
        {
            Recovery::Resume => Ok(()),
            Recovery::Halt => Err(Error::Handler {
                sequence,
                source: error,
            }),
        }
    }

    fn process_events(&mut self) -> Result<()> {
        let sequence = Arc::clone(self.handle.sequence());
        let mut processed_sequence = true;
        let mut cached_available_sequence = i64::MIN;
        let mut next_sequence = sequence.get();

        while self.handle.is_running() {
            if processed_sequence {
                processed_sequence = false;
                loop {
                    next_sequence = self.work_sequence.get() + 1;
                    sequence.set(next_sequence - 1);
                    if self
                        .work_sequence
                        .compare_and_set(next_sequence - 1, next_sequence)
                    {
                        break;
                    }
                }
            }

            if cached_available_sequence >= next_sequence {
                // SAFETY: `next_sequence` is published, and this worker's sequence sits
                // just below it, gating producers until the event is handled.
                let event = unsafe { self.ring_buffer.get(next_sequence) };
                if let Err(error) = self.handler.on_event(event) {
                    self.fail(error, next_sequence, Some(event))?;
                }
                processed_sequence = true;
                continue;
            }

            match self.handle.barrier().wait_for(next_sequence) {
                Ok(available) => cached_available_sequence = available,
                Err(Error::Timeout) => {
                    let current = sequence.get();
                    if let Err(error) = self.handler.on_timeout(current) {
                        self.fail(error, current, None)?;
                    }
                }
                Err(Error::Alert) => {
                    if !self.handle.is_running() {
                        break;
                    }
                    // another worker of the pool was halted
                    thread::yield_now();
                }
                Err(error) => {
                    error!(%error, "work processor wait failed");
                    return Err(error);
                }
            }
        }

        Ok(())
    }
}

impl<E> EventProcessor for WorkProcessor<E>
where
    E: Send + Sync,
{
    fn handle(&self) -> ProcessorHandle {
        self.handle.clone()
    }

    fn run(&mut self) -> Result<()> {
        if !self.handle.try_start()? {
            debug!("work processor halted before it ran");
            self.notify_start();
            self.notify_shutdown();
            return Ok(());
        }

        debug!(sequence = self.handle.sequence().get(), "work processor started");
        self.notify_start();

        let result = self.process_events();

        self.notify_shutdown();
        self.handle.finish();
        debug!(sequence = self.handle.sequence().get(), "work processor stopped");
        result
    }
}

impl<E> fmt::Debug for WorkProcessor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkProcessor")
            .field("handle", &self.handle)
            .field("work_sequence", &self.work_sequence)
            .finish_non_exhaustive()
    }
}
