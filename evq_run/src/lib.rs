//! Run closures on a dedicated event-loop thread, delivered through one-shot
//! user events of an OS event queue.
//!
//! Any number of producer threads hand a closure to [`dispatch`] and get back a
//! [`DispatchHandle`] to its result. One consumer thread blocks on the queue,
//! runs each delivered closure exactly once, and stops when it sees the
//! shutdown event raised by [`cancel`]. The crate consists of:
//!
//! - [`reactor`]: the event queue of one-shot, user-triggerable events
//! - [`task`]: type-erased payloads carrying a deferred computation
//! - [`dispatcher`]: the producer API that registers and fires payload events
//! - [`executor`]: the event loop thread
//! - [`runtime`]: ties the pieces together and owns their lifetimes
//!
//! ```ignore
//! let runtime = evq_run::Runtime::new()?;
//! let handles: Vec<_> = (0..5).map(|i| runtime.dispatch(move || i * i)).collect::<Result<_, _>>()?;
//! runtime.cancel()?;
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod handle;
pub mod reactor;
pub mod runtime;
pub mod task;
mod waker;

pub use config::Builder;
pub use dispatcher::Dispatcher;
pub use error::{BuildError, DispatchError, QueueError};
pub use executor::{EventLoop, LoopStats};
pub use handle::DispatchHandle;
pub use reactor::Ident;
pub use runtime::{block_on, cancel, dispatch, Runtime};

pub use evq_run_macros::main;
