//! Type-erased tasks travelling through the event queue.

use metrics::gauge;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::DispatchError;
use crate::handle::{DispatchHandle, Shared};
use crate::reactor::Ident;

/// A boxed closure that runs the task and reports how it ended.
pub type Job = Box<dyn FnOnce() -> Outcome + Send + 'static>;

/// How a [`Payload`] run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Panicked,
}

/// A deferred computation bundled with the code that runs it.
///
/// The dispatcher moves the payload into the event queue when it registers the
/// event. The event loop takes it back on delivery and consumes it with
/// [`Payload::run`], so a payload can run at most once. Dropping a payload
/// without running it resolves its handle with [`DispatchError::Abandoned`].
///
/// A payload counts towards `evq_tasks_pending_current` from creation until
/// its handle is resolved, whichever way that happens.
pub struct Payload {
    ident: Ident,
    job: Job,
}

impl Payload {
    /// Wraps `f` in a deferred computation and returns the payload together
    /// with the handle that observes its result.
    ///
    /// A panic in `f` is caught and stored as [`DispatchError::Panicked`]; it
    /// never unwinds into the thread that runs the payload.
    pub fn new<F, R>(ident: Ident, f: F) -> (Self, DispatchHandle<R>)
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let shared = Arc::new(Shared::new());
        let handle = DispatchHandle::new(ident, shared.clone());
        gauge!("evq_tasks_pending_current").increment(1.0);
        let mut completer = Completer {
            shared: Some(shared),
        };

        let job: Job = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(f)).map_err(|cause| {
                DispatchError::Panicked {
                    message: panic_message(cause.as_ref()),
                }
            });
            let outcome = match result {
                Ok(_) => Outcome::Completed,
                Err(_) => Outcome::Panicked,
            };
            completer.complete(result);
            outcome
        });

        (Self { ident, job }, handle)
    }

    pub fn ident(&self) -> Ident {
        self.ident
    }

    /// Runs the task and fulfils its handle.
    pub fn run(self) -> Outcome {
        (self.job)()
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Payload").field("ident", &self.ident).finish()
    }
}

/// Producer half of a deferred computation's result slot.
struct Completer<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> Completer<T> {
    fn complete(&mut self, result: Result<T, DispatchError>) {
        if let Some(shared) = self.shared.take() {
            shared.fulfil(result);
            gauge!("evq_tasks_pending_current").decrement(1.0);
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        self.complete(Err(DispatchError::Abandoned));
    }
}

fn panic_message(cause: &(dyn Any + Send)) -> String {
    if let Some(s) = cause.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn run_fulfils_the_handle() {
        let (payload, handle) = Payload::new(Ident(3), || 6 * 7);
        assert_eq!(payload.ident(), Ident(3));
        assert_eq!(handle.ident(), Ident(3));
        assert!(!handle.is_ready());

        assert_eq!(payload.run(), Outcome::Completed);
        assert!(handle.is_ready());
        assert_eq!(handle.wait().unwrap(), 42);
    }

    #[test]
    fn panic_is_captured_in_the_handle() {
        let (payload, handle) = Payload::new(Ident(1), || -> u32 { panic!("boom") });

        assert_eq!(payload.run(), Outcome::Panicked);
        match handle.wait() {
            Err(DispatchError::Panicked { message }) => assert_eq!(message, "boom"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn formatted_panic_message_is_kept() {
        let (payload, handle) = Payload::new(Ident(1), || -> u8 { panic!("task {} failed", 7) });
        payload.run();
        assert!(matches!(
            handle.wait(),
            Err(DispatchError::Panicked { message }) if message == "task 7 failed"
        ));
    }

    #[test]
    fn dropped_payload_abandons_the_handle() {
        let ran = Arc::new(AtomicUsize::new(0));
        let (payload, handle) = {
            let ran = ran.clone();
            Payload::new(Ident(1), move || ran.fetch_add(1, Ordering::SeqCst))
        };

        drop(payload);
        assert!(matches!(handle.wait(), Err(DispatchError::Abandoned)));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn payload_is_pending_until_its_handle_resolves() {
        use metrics_util::debugging::{DebugValue, DebuggingRecorder};

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let pending = || {
            snapshotter
                .snapshot()
                .into_vec()
                .into_iter()
                .find(|(key, ..)| key.key().name() == "evq_tasks_pending_current")
                .map(|(.., value)| match value {
                    DebugValue::Gauge(g) => g.into_inner(),
                    other => panic!("unexpected metric value: {other:?}"),
                })
        };

        metrics::with_local_recorder(&recorder, || {
            let (ran, _ran_handle) = Payload::new(Ident(1), || 1);
            let (dropped, _dropped_handle) = Payload::new(Ident(2), || 2);
            assert_eq!(pending(), Some(2.0));

            ran.run();
            assert_eq!(pending(), Some(1.0));
            drop(dropped);
            assert_eq!(pending(), Some(0.0));
        });
    }
}
