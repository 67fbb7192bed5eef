//! The event loop thread.
//!
//! Exactly one thread consumes the event queue. It runs each delivered payload
//! in delivery order and stops when it sees the shutdown identity.

mod worker;

pub use self::worker::LoopStats;

use std::panic;
use std::thread::{self, JoinHandle};
use tracing::info;

use crate::error::QueueError;
use crate::reactor::Poller;
use crate::task::Payload;

/// Handle to the running event loop thread.
#[derive(Debug)]
pub struct EventLoop {
    thread: JoinHandle<Result<LoopStats, QueueError>>,
}

impl EventLoop {
    /// Spawns the loop on a new thread named `name`, moving `poller` into it.
    pub fn start(name: &str, poller: Poller<Payload>) -> Result<Self, QueueError> {
        let thread = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || worker::Worker::new(poller).run())?;

        info!(thread = name, "event loop started");
        Ok(Self { thread })
    }

    /// `true` once the loop thread has returned.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the loop thread to exit.
    ///
    /// Returns the loop's statistics, or the queue failure that stopped it.
    pub fn join(self) -> Result<LoopStats, QueueError> {
        match self.thread.join() {
            Ok(result) => result,
            Err(cause) => panic::resume_unwind(cause),
        }
    }
}
