//! Producer-side API: hand closures to the event loop and signal shutdown.

use metrics::counter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::{DispatchError, QueueError};
use crate::handle::DispatchHandle;
use crate::reactor::{EventQueue, Ident};
use crate::task::Payload;

/// First identity handed to a payload. Everything below it is reserved.
const FIRST_PAYLOAD_IDENT: u64 = Ident::SHUTDOWN.0 + 1;

/// Sends closures to the event loop through one-shot user events.
///
/// Shared by reference (usually behind an `Arc`) between any number of
/// producer threads. Queue operations are thread-safe on their own, so no lock
/// is taken here.
pub struct Dispatcher {
    queue: Arc<EventQueue<Payload>>,
    next_ident: AtomicU64,
}

impl Dispatcher {
    pub fn new(queue: Arc<EventQueue<Payload>>) -> Self {
        Self {
            queue,
            next_ident: AtomicU64::new(FIRST_PAYLOAD_IDENT),
        }
    }

    /// Runs `f` on the event loop and returns a handle to its result.
    ///
    /// The closure is wrapped in a [`Payload`] that moves into the queue under
    /// a fresh identity; the event is registered and then triggered. Never
    /// blocks on queue depth.
    ///
    /// # Errors
    ///
    /// Returns a [`QueueError`] if either queue call fails, for instance
    /// because the queue was closed.
    pub fn dispatch<F, R>(&self, f: F) -> Result<DispatchHandle<R>, QueueError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let ident = Ident(self.next_ident.fetch_add(1, Ordering::Relaxed));
        let (payload, handle) = Payload::new(ident, f);

        // Add and fire are two separate changes; the event cannot fire in the
        // call that adds it.
        self.queue.register_oneshot(ident, Some(payload))?;
        self.queue.trigger(ident)?;

        counter!("evq_tasks_dispatched_total").increment(1);
        trace!(%ident, "dispatched task");

        Ok(handle)
    }

    /// Dispatches `f` and blocks until it has run.
    pub fn call<F, R>(&self, f: F) -> Result<R, DispatchError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.dispatch(f)?.wait()
    }

    /// Asks the event loop to stop.
    ///
    /// Tasks whose events are delivered after the shutdown event are never run.
    pub fn cancel(&self) -> Result<(), QueueError> {
        self.queue.register_oneshot(Ident::SHUTDOWN, None)?;
        self.queue.trigger(Ident::SHUTDOWN)?;
        debug!("shutdown signalled");
        Ok(())
    }

    /// `true` once the queue behind this dispatcher was closed, after which
    /// every [`dispatch`](Self::dispatch) and [`cancel`](Self::cancel) fails
    /// with [`QueueError::Closed`].
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    pub(crate) fn queue(&self) -> &Arc<EventQueue<Payload>> {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identities_start_after_shutdown_and_increase() {
        let (queue, mut poller) = EventQueue::new(10).unwrap();
        let dispatcher = Dispatcher::new(queue);

        let first = dispatcher.dispatch(|| 1).unwrap();
        let second = dispatcher.dispatch(|| 2).unwrap();
        assert_eq!(first.ident(), Ident(1));
        assert_eq!(second.ident(), Ident(2));

        let batch = poller.wait().unwrap();
        let idents: Vec<_> = batch.iter().map(|e| e.ident).collect();
        assert_eq!(idents, vec![Ident(1), Ident(2)]);
        assert!(batch.iter().all(|e| e.udata.is_some()));
    }

    #[test]
    fn delivered_payload_fulfils_the_handle() {
        let (queue, mut poller) = EventQueue::new(10).unwrap();
        let dispatcher = Dispatcher::new(queue);
        let handle = dispatcher.dispatch(|| "done").unwrap();

        for event in poller.wait().unwrap() {
            event.udata.unwrap().run();
        }
        assert_eq!(handle.wait().unwrap(), "done");
    }

    #[test]
    fn cancel_fires_the_shutdown_identity_without_data() {
        let (queue, mut poller) = EventQueue::new(10).unwrap();
        let dispatcher = Dispatcher::new(queue);
        dispatcher.cancel().unwrap();

        let batch = poller.wait().unwrap();
        assert_eq!(batch.len(), 1);
        assert!(batch[0].ident.is_shutdown());
        assert!(batch[0].udata.is_none());
    }

    #[test]
    fn dispatch_on_closed_queue_fails() {
        let (queue, _poller) = EventQueue::new(10).unwrap();
        let dispatcher = Dispatcher::new(queue);
        assert!(!dispatcher.is_closed());
        dispatcher.queue().close().unwrap();

        assert!(dispatcher.is_closed());
        assert!(matches!(dispatcher.dispatch(|| ()), Err(QueueError::Closed)));
        assert!(matches!(dispatcher.cancel(), Err(QueueError::Closed)));
    }
}
