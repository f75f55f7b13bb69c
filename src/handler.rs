//! Callbacks that user code plugs into the processors.
//!
//! An [`EventHandler`] sees every event in order and is driven by a
//! [`BatchEventProcessor`](crate::BatchEventProcessor). A [`WorkHandler`] sees
//! each event on exactly one of several workers and is driven by a
//! [`WorkProcessor`](crate::WorkProcessor), usually inside a
//! [`WorkerPool`](crate::WorkerPool).
//!
//! Handlers get shared access to the event. Several processors may read the
//! same slot at once, so a stage that enriches events for later stages does
//! it through interior mutability (atomics or a lock inside the event).

use crate::error::HandlerError;

/// Handles events in sequence order.
pub trait EventHandler<E>: Send {
    /// Called once per event. `end_of_batch` is `true` on the last event of
    /// the batch the barrier returned, which is the point to flush buffered
    /// work.
    fn on_event(&mut self, event: &E, sequence: i64, end_of_batch: bool)
    -> Result<(), HandlerError>;

    /// Called on the processor thread before the first event.
    fn on_start(&mut self) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Called on the processor thread after the last event, once halted.
    fn on_shutdown(&mut self) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Called when a timeout-bounded wait strategy gives up; `sequence` is the
    /// last sequence this handler processed.
    fn on_timeout(&mut self, _sequence: i64) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Called before each batch with the number of events in it.
    fn on_batch_start(&mut self, _batch_size: i64) {}
}

impl<E, H> EventHandler<E> for Box<H>
where
    H: EventHandler<E> + ?Sized,
{
    fn on_event(
        &mut self,
        event: &E,
        sequence: i64,
        end_of_batch: bool,
    ) -> Result<(), HandlerError> {
        (**self).on_event(event, sequence, end_of_batch)
    }

    fn on_start(&mut self) -> Result<(), HandlerError> {
        (**self).on_start()
    }

    fn on_shutdown(&mut self) -> Result<(), HandlerError> {
        (**self).on_shutdown()
    }

    fn on_timeout(&mut self, sequence: i64) -> Result<(), HandlerError> {
        (**self).on_timeout(sequence)
    }

    fn on_batch_start(&mut self, batch_size: i64) {
        (**self).on_batch_start(batch_size)
    }
}

/// Handles events that are load-balanced across a pool of workers.
///
/// Each event reaches exactly one worker, in no particular order relative to
/// the events other workers handle.
pub trait WorkHandler<E>: Send {
    fn on_event(&mut self, event: &E) -> Result<(), HandlerError>;

    fn on_start(&mut self) -> Result<(), HandlerError> {
        Ok(())
    }

    fn on_shutdown(&mut self) -> Result<(), HandlerError> {
        Ok(())
    }

    fn on_timeout(&mut self, _sequence: i64) -> Result<(), HandlerError> {
        Ok(())
    }
}

impl<E, H> WorkHandler<E> for Box<H>
where
    H: WorkHandler<E> + ?Sized,
{
    fn on_event(&mut self, event: &E) -> Result<(), HandlerError> {
        (**self).on_event(event)
    }

    fn on_start(&mut self) -> Result<(), HandlerError> {
        (**self).on_start()
    }

    fn on_shutdown(&mut self) -> Result<(), HandlerError> {
        (**self).on_shutdown()
    }

    fn on_timeout(&mut self, sequence: i64) -> Result<(), HandlerError> {
        (**self).on_timeout(sequence)
    }
}
