use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Wake, Waker};
use std::thread::{self, Thread};
use std::time::Instant;

/// Wakes a parked thread.
///
/// Used by [`block_on`](crate::runtime::block_on) and
/// [`DispatchHandle::wait_timeout`](crate::DispatchHandle::wait_timeout) to sleep
/// the calling thread until the event loop fulfils a result. The `notified`
/// flag filters out spurious unparks.
pub(crate) struct Unparker {
    thread: Thread,
    notified: AtomicBool,
}

impl Unparker {
    /// An unparker for the calling thread.
    pub fn current() -> Arc<Self> {
        Arc::new(Self {
            thread: thread::current(),
            notified: AtomicBool::new(false),
        })
    }

    pub fn waker(self: &Arc<Self>) -> Waker {
        Waker::from(self.clone())
    }

    /// Parks until woken.
    pub fn park(&self) {
        while !self.notified.swap(false, Ordering::Acquire) {
            thread::park();
        }
    }

    /// Parks until woken or `deadline` passes. Returns `true` if woken.
    pub fn park_until(&self, deadline: Instant) -> bool {
        loop {
            if self.notified.swap(false, Ordering::Acquire) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::park_timeout(deadline - now);
        }
    }
}

impl Wake for Unparker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.notified.store(true, Ordering::Release);
        self.thread.unpark();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn wake_before_park_is_not_lost() {
        let unparker = Unparker::current();
        unparker.waker().wake();
        unparker.park();
    }

    #[test]
    fn park_until_times_out_without_wake() {
        let unparker = Unparker::current();
        let deadline = Instant::now() + Duration::from_millis(10);
        assert!(!unparker.park_until(deadline));
        assert!(Instant::now() >= deadline);
    }

    #[test]
    fn wake_from_another_thread() {
        let unparker = Unparker::current();
        let waker = unparker.waker();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            waker.wake();
        });
        assert!(unparker.park_until(Instant::now() + Duration::from_secs(5)));
        t.join().unwrap();
    }
}
