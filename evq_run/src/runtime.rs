//! The runtime owning the event queue and its loop thread.
//!
//! The runtime creates the queue, spawns the loop, and stores the dispatcher
//! in thread-local storage so the free functions [`dispatch`] and [`cancel`]
//! can reach it.

use std::cell::RefCell;
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tracing::{debug, info, warn};

use crate::config::Builder;
use crate::dispatcher::Dispatcher;
use crate::error::{BuildError, DispatchError, QueueError};
use crate::executor::{EventLoop, LoopStats};
use crate::handle::DispatchHandle;
use crate::reactor::EventQueue;
use crate::waker::Unparker;

thread_local! {
    static CONTEXT: RefCell<Option<Arc<Dispatcher>>> = const { RefCell::new(None) };
}

/// The event queue, its dispatcher and the loop thread consuming it.
///
/// The loop lives strictly between the creation of the queue and its close:
/// [`shutdown`](Self::shutdown) stops the loop, joins it, then closes the
/// queue. Dropping the runtime does the same.
pub struct Runtime {
    dispatcher: Arc<Dispatcher>,
    event_loop: Option<EventLoop>,
}

impl Runtime {
    /// Starts a runtime with the default configuration and enters it on the
    /// calling thread.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let runtime = Runtime::new()?;
    /// let handle = runtime.dispatch(|| 6 * 7)?;
    /// assert_eq!(handle.wait()?, 42);
    /// runtime.shutdown()?;
    /// ```
    pub fn new() -> Result<Self, BuildError> {
        Builder::new().build()
    }

    pub fn builder() -> Builder {
        Builder::new()
    }

    pub(crate) fn start(config: Builder) -> Result<Self, BuildError> {
        // Initialize metrics page
        if let Some(addr) = config.metrics_addr {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .with_http_listener(addr)
                .install()?;
            info!(%addr, "metrics enabled at http://{addr}/metrics");
        }

        let (queue, poller) = EventQueue::new(config.batch_size)?;
        let event_loop = EventLoop::start(&config.thread_name, poller)?;
        let runtime = Self {
            dispatcher: Arc::new(Dispatcher::new(queue)),
            event_loop: Some(event_loop),
        };

        runtime.enter();

        Ok(runtime)
    }

    /// Makes this runtime the target of [`dispatch`] and [`cancel`] on the
    /// calling thread.
    ///
    /// [`Runtime::new`] enters the runtime on the thread that builds it; call
    /// this on any other producer thread that should use the free functions.
    /// Entering replaces whichever runtime the thread entered before, and
    /// [`shutdown`](Self::shutdown) leaves it again on the thread that shuts it
    /// down.
    pub fn enter(&self) {
        CONTEXT.with(|c| *c.borrow_mut() = Some(self.dispatcher.clone()));
    }

    /// Runs `f` on the event loop. See [`Dispatcher::dispatch`].
    pub fn dispatch<F, R>(&self, f: F) -> Result<DispatchHandle<R>, QueueError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.dispatcher.dispatch(f)
    }

    /// Runs `f` on the event loop and waits for its result.
    pub fn call<F, R>(&self, f: F) -> Result<R, DispatchError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.dispatcher.call(f)
    }

    /// Signals the loop to stop without waiting for it.
    pub fn cancel(&self) -> Result<(), QueueError> {
        self.dispatcher.cancel()
    }

    /// A producer handle that can be moved to other threads.
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    /// `true` while the loop thread has not exited.
    pub fn is_running(&self) -> bool {
        self.event_loop.as_ref().is_some_and(|l| !l.is_finished())
    }

    /// Blocks the current thread until `fut` completes.
    ///
    /// The future is polled on the calling thread, not on the event loop, so
    /// it may await [`DispatchHandle`]s without deadlocking the loop.
    ///
    /// # Arguments
    ///
    /// * `fut` - The future to drive, typically one awaiting dispatch handles
    ///
    /// # Returns
    ///
    /// The future's output.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let runtime = Runtime::new()?;
    /// let handle = runtime.dispatch(|| 1 + 1)?;
    /// let two = runtime.block_on(async { handle.await })?;
    /// ```
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        block_on(fut)
    }

    /// Stops the loop, waits for it to exit and closes the queue.
    ///
    /// Tasks that were dispatched but not run by then are released and their
    /// handles report [`DispatchError::Abandoned`].
    ///
    /// # Errors
    ///
    /// The queue failure that stopped the loop, or a failure to close it.
    pub fn shutdown(mut self) -> Result<LoopStats, QueueError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<LoopStats, QueueError> {
        let Some(event_loop) = self.event_loop.take() else {
            return Err(QueueError::Closed);
        };
        let queue = self.dispatcher.queue();

        if let Err(err) = signal_stop(&self.dispatcher, &event_loop) {
            warn!(%err, "could not signal shutdown, closing the queue");
            // Closing also wakes the loop, which then exits with `Closed`.
            let _ = queue.close();
        }

        let stats = event_loop.join();
        self.leave();

        match queue.close() {
            Ok(()) | Err(QueueError::Closed) => {}
            Err(err) => return Err(err),
        }
        stats
    }

    fn leave(&self) {
        CONTEXT.with(|c| {
            let mut current = c.borrow_mut();
            if current
                .as_ref()
                .is_some_and(|d| Arc::ptr_eq(d, &self.dispatcher))
            {
                *current = None;
            }
        });
    }
}

/// Sends the shutdown event unless the loop is already gone.
///
/// An earlier `cancel` may still be armed when the event is registered again;
/// if the loop delivers it before the trigger, the trigger finds nothing
/// registered. The loop is stopping in that case, so it counts as success.
fn signal_stop(dispatcher: &Dispatcher, event_loop: &EventLoop) -> Result<(), QueueError> {
    if event_loop.is_finished() {
        return Ok(());
    }
    match dispatcher.cancel() {
        Err(QueueError::NotRegistered(ident)) if ident.is_shutdown() => {
            debug!("shutdown already delivered");
            Ok(())
        }
        result => result,
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if self.event_loop.is_some() {
            if let Err(err) = self.stop() {
                warn!(%err, "runtime dropped with a failed event loop");
            }
        }
    }
}

/// Drives `fut` to completion on the current thread, parking between polls.
///
/// The thread is parked whenever the future is pending and unparked by the
/// future's waker, so a blocked caller uses no CPU while it waits for the
/// event loop. No runtime needs to be entered.
///
/// # Arguments
///
/// * `fut` - The future to drive to completion
///
/// # Returns
///
/// The future's output.
pub fn block_on<F: Future>(fut: F) -> F::Output {
    let mut fut = pin!(fut);
    let unparker = Unparker::current();
    let waker = unparker.waker();
    let mut cx = Context::from_waker(&waker);

    loop {
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(output) => return output,
            Poll::Pending => unparker.park(),
        }
    }
}

/// Runs `f` on the event loop of the runtime entered on this thread.
///
/// # Arguments
///
/// * `f` - The closure to run; its result or panic is delivered to the handle
///
/// # Returns
///
/// A [`DispatchHandle`] that resolves once the loop has run `f`, or a
/// [`QueueError`] if the entered runtime's queue rejected the event.
///
/// # Panics
///
/// Panics if no runtime was entered on the calling thread.
///
/// # Examples
///
/// ```ignore
/// #[evq_run::main]
/// async fn main() {
///     let answer = evq_run::dispatch(|| 42).unwrap().await.unwrap();
///     assert_eq!(answer, 42);
/// }
/// ```
pub fn dispatch<F, R>(f: F) -> Result<DispatchHandle<R>, QueueError>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    current().dispatch(f)
}

/// Signals the event loop of the runtime entered on this thread to stop.
///
/// Does not wait for the loop to exit; use [`Runtime::shutdown`] for that.
///
/// # Returns
///
/// `Ok(())` once the shutdown event is fired, or the [`QueueError`] from
/// registering or triggering it.
///
/// # Panics
///
/// Panics if no runtime was entered on the calling thread.
pub fn cancel() -> Result<(), QueueError> {
    current().cancel()
}

fn current() -> Arc<Dispatcher> {
    CONTEXT.with(|c| {
        c.borrow()
            .clone()
            .expect("evq_run: called outside of a runtime context")
    })
}
