//! What a processor does when a handler fails.

use crate::error::HandlerError;
use std::fmt;
use tracing::{error, warn};

/// Decision returned by [`ExceptionHandler::handle_event_exception`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Skip the failed event and keep processing.
    Resume,
    /// Stop the processor. Its `run` returns [`Error::Handler`](crate::Error::Handler).
    Halt,
}

/// Receives the errors raised by event and work handlers.
///
/// One exception handler may be shared by every worker of a pool, so it must
/// be `Sync`.
pub trait ExceptionHandler<E>: Send + Sync + fmt::Debug {
    /// A handler failed at `sequence`. `event` is `None` when the failure did
    /// not concern a readable event, such as a failed `on_timeout`.
    fn handle_event_exception(
        &self,
        error: &HandlerError,
        sequence: i64,
        event: Option<&E>,
    ) -> Recovery;

    /// `on_start` failed. The processor runs anyway.
    fn handle_on_start_exception(&self, error: &HandlerError);

    /// `on_shutdown` failed. The processor is already stopping.
    fn handle_on_shutdown_exception(&self, error: &HandlerError);
}

/// Logs the failure and halts the processor.
///
/// This is what processors use unless told otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct FatalExceptionHandler;

impl<E> ExceptionHandler<E> for FatalExceptionHandler {
    fn handle_event_exception(
        &self,
        error: &HandlerError,
        sequence: i64,
        _event: Option<&E>,
    ) -> Recovery {
        error!(sequence, %error, "event handler failed, halting processor");
        Recovery::Halt
    }

    fn handle_on_start_exception(&self, error: &HandlerError) {
        error!(%error, "event handler failed on start");
    }

    fn handle_on_shutdown_exception(&self, error: &HandlerError) {
        error!(%error, "event handler failed on shutdown");
    }
}

/// Logs the failure and moves on to the next event.
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreExceptionHandler;

impl<E> ExceptionHandler<E> for IgnoreExceptionHandler {
    fn handle_event_exception(
        &self,
        error: &HandlerError,
        sequence: i64,
        _event: Option<&E>,
    ) -> Recovery {
        warn!(sequence, %error, "event handler failed, skipping event");
        Recovery::Resume
    }

    fn handle_on_start_exception(&self, error: &HandlerError) {
        warn!(%error, "event handler failed on start");
    }

    fn handle_on_shutdown_exception(&self, error: &HandlerError) {
        warn!(%error, "event handler failed on shutdown");
    }
}
