//! Error types shared across the crate.

use std::io;

use thiserror::Error;

use crate::reactor::Ident;

/// A failure of the underlying event queue.
///
/// Every variant is fatal for the event loop: the loop thread logs it and exits
/// instead of continuing in a degraded state. Nothing is retried.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The OS refused a create, register, trigger or wait call.
    #[error("event queue call failed: {0}")]
    Io(#[from] io::Error),
    /// The queue was closed; all pending and future operations are invalid.
    #[error("event queue is closed")]
    Closed,
    /// `trigger` named an identity with no registered event.
    #[error("no event registered for {0}")]
    NotRegistered(Ident),
}

/// Why a [`DispatchHandle`](crate::DispatchHandle) did not produce a value.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// The closure panicked on the loop thread.
    #[error("task panicked: {message}")]
    Panicked { message: String },
    /// The payload was released without running, because the loop shut down
    /// before the event carrying it was delivered.
    #[error("task was abandoned before it ran")]
    Abandoned,
    /// The result was already taken from this handle with
    /// [`try_take`](crate::DispatchHandle::try_take).
    #[error("task result was already taken")]
    AlreadyTaken,
}

/// Errors raised while building a [`Runtime`](crate::runtime::Runtime).
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("failed to install metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
}
