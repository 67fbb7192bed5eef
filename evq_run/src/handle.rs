use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use crate::error::DispatchError;
use crate::reactor::Ident;
use crate::waker::Unparker;

enum Slot<T> {
    Pending(Option<Waker>),
    Ready(Result<T, DispatchError>),
    Taken,
}

/// Result slot shared by a deferred computation and its handle.
pub(crate) struct Shared<T> {
    slot: Mutex<Slot<T>>,
}

impl<T> Shared<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Pending(None)),
        }
    }

    /// Stores the result and wakes whoever waits on it.
    pub fn fulfil(&self, result: Result<T, DispatchError>) {
        let previous = mem::replace(&mut *self.lock(), Slot::Ready(result));
        if let Slot::Pending(Some(waker)) = previous {
            waker.wake();
        }
    }

    /// Resolves to [`DispatchError::AlreadyTaken`] once the result is gone.
    fn poll_take(&self, waker: &Waker) -> Poll<Result<T, DispatchError>> {
        let mut slot = self.lock();
        if let Slot::Pending(registered) = &mut *slot {
            if !registered.as_ref().is_some_and(|w| w.will_wake(waker)) {
                *registered = Some(waker.clone());
            }
            return Poll::Pending;
        }

        match mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(result) => Poll::Ready(result),
            _ => Poll::Ready(Err(DispatchError::AlreadyTaken)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to the result of a dispatched closure.
///
/// Becomes ready exactly when the event loop has run the matching payload. The
/// result can be retrieved once, by blocking with [`wait`](Self::wait) or
/// [`wait_timeout`](Self::wait_timeout), by polling with
/// [`try_take`](Self::try_take), or by `.await`ing the handle. Asking again
/// after the result was taken yields [`DispatchError::AlreadyTaken`].
///
/// # Examples
///
/// ```ignore
/// let runtime = Runtime::new()?;
/// let handle = runtime.dispatch(|| 2 + 2)?;
/// assert_eq!(handle.wait()?, 4);
/// ```
pub struct DispatchHandle<T> {
    ident: Ident,
    shared: Arc<Shared<T>>,
}

impl<T> DispatchHandle<T> {
    pub(crate) fn new(ident: Ident, shared: Arc<Shared<T>>) -> Self {
        Self { ident, shared }
    }

    /// Identity of the event carrying this task.
    pub fn ident(&self) -> Ident {
        self.ident
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.shared.lock(), Slot::Ready(_))
    }

    /// Takes the result if the task has finished.
    ///
    /// Returns `None` while the task is pending. Once a result has been
    /// returned, later calls yield `Some(Err(DispatchError::AlreadyTaken))`.
    pub fn try_take(&mut self) -> Option<Result<T, DispatchError>> {
        let mut slot = self.shared.lock();
        match mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(result) => Some(result),
            Slot::Taken => Some(Err(DispatchError::AlreadyTaken)),
            pending @ Slot::Pending(_) => {
                *slot = pending;
                None
            }
        }
    }

    /// Blocks the calling thread until the task has run.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Panicked`] if the closure panicked,
    /// [`DispatchError::Abandoned`] if the loop shut down before running it,
    /// [`DispatchError::AlreadyTaken`] if [`try_take`](Self::try_take) already
    /// returned the result.
    pub fn wait(self) -> Result<T, DispatchError> {
        crate::runtime::block_on(self)
    }

    /// Like [`wait`](Self::wait), but gives up after `timeout` and returns
    /// `Ok(None)`. The handle stays usable after a timeout.
    ///
    /// # Errors
    ///
    /// The same as [`wait`](Self::wait); a result taken earlier is reported as
    /// [`DispatchError::AlreadyTaken`], never as a timeout.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<T>, DispatchError> {
        let deadline = Instant::now() + timeout;
        let unparker = Unparker::current();
        let waker = unparker.waker();

        loop {
            if let Poll::Ready(result) = self.shared.poll_take(&waker) {
                return result.map(Some);
            }
            if !unparker.park_until(deadline) {
                return match self.try_take() {
                    Some(result) => result.map(Some),
                    None => Ok(None),
                };
            }
        }
    }
}

impl<T> Future for DispatchHandle<T> {
    type Output = Result<T, DispatchError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.shared.poll_take(cx.waker())
    }
}

impl<T> std::fmt::Debug for DispatchHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchHandle")
            .field("ident", &self.ident)
            .field("ready", &self.is_ready())
            .finish()
    }
}
