//! Event queue of one-shot user events.
//!
//! The reactor wraps the OS event multiplexer and only ever carries software
//! events: a producer arms an event with [`EventQueue::register_oneshot`], fires it
//! with [`EventQueue::trigger`], and the consumer thread picks it up from
//! [`Poller::wait`].

pub mod queue;
pub use queue::{Event, EventQueue, Filter, Ident, Poller};
