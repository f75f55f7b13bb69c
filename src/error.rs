//! Error types shared by every component of the ring buffer.
//!
//! Two of the variants are control flow rather than failures: [`Error::Alert`]
//! and [`Error::Timeout`] are raised by wait strategies and consumed by the
//! processor run loops. They only reach callers that drive a
//! [`SequenceBarrier`](crate::SequenceBarrier) by hand.

use thiserror::Error;

/// Error raised by a user-supplied event or work handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur while claiming, publishing or consuming sequences.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A caller passed an argument that can never succeed: a capacity that is
    /// not a power of two, a batch size outside `1..=capacity`, a second
    /// `start` of a worker pool, and the like.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The sequence barrier was alerted while waiting.
    #[error("sequence barrier alerted")]
    Alert,

    /// A timeout-bounded wait strategy gave up before the target sequence
    /// became available.
    #[error("timed out waiting for sequence")]
    Timeout,

    /// A non-blocking claim found the ring buffer full.
    #[error("insufficient capacity in ring buffer")]
    InsufficientCapacity,

    /// A wait was abandoned by something other than the barrier alert.
    #[error("wait interrupted")]
    Interrupted,

    /// The slot storage for the ring buffer could not be allocated.
    #[error("failed to allocate ring buffer storage for {capacity} slots")]
    StorageAllocation {
        /// Number of slots that were requested.
        capacity: usize,
    },

    /// An executor could not start a thread for a processor.
    #[error("failed to spawn processor thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// A handler failed and the exception handler decided to stop processing.
    #[error("event handler failed at sequence {sequence}: {source}")]
    Handler {
        /// Sequence of the event being handled.
        sequence: i64,
        /// The error returned by the handler.
        #[source]
        source: HandlerError,
    },
}

impl Error {
    #[cold]
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }
}
