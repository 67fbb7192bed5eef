use crossbeam_queue::SegQueue;
use metrics::counter;
use mio::{Events, Poll, Token, Waker};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::QueueError;

/// The single OS-level registration backing every user event.
const USER_TOKEN: Token = Token(0);

/// Identity of a user event.
///
/// Identity `0` is reserved for the shutdown signal; payload identities are
/// handed out from a counter that starts at `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident(pub(crate) u64);

impl Ident {
    /// Tells the event loop to stop.
    pub const SHUTDOWN: Ident = Ident(0);

    pub fn is_shutdown(self) -> bool {
        self == Self::SHUTDOWN
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_shutdown() {
            f.write_str("event#shutdown")
        } else {
            write!(f, "event#{}", self.0)
        }
    }
}

/// Kind of a delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// A software event fired with [`EventQueue::trigger`].
    User,
}

/// A ready event returned by [`Poller::wait`].
#[derive(Debug)]
pub struct Event<D> {
    pub ident: Ident,
    pub filter: Filter,
    /// Data attached at registration, moved out of the queue on delivery.
    pub udata: Option<D>,
}

struct Registration<D> {
    udata: Option<D>,
    triggered: bool,
}

struct State<D> {
    registrations: HashMap<Ident, Registration<D>>,
    closed: bool,
}

/// Queue of one-shot, user-triggerable events.
///
/// Registration and triggering are separate calls and may be issued from any
/// number of threads. The blocking half lives in [`Poller`], which is owned by
/// exactly one consumer thread.
///
/// # Architecture
///
/// - **Registrations**: side table from [`Ident`] to the data owned by that event
/// - **Fired queue**: identities in trigger order, waiting to be delivered
/// - **Waker**: a `mio::Waker` (`EVFILT_USER` on kqueue, an eventfd on epoll)
///   that pulls the consumer out of its blocking wait
pub struct EventQueue<D> {
    waker: Waker,
    state: Mutex<State<D>>,
    fired: SegQueue<Ident>,
}

impl<D> EventQueue<D> {
    /// Creates a queue and the poller that waits on it.
    ///
    /// `batch_size` caps how many events a single [`Poller::wait`] returns.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Io`] if the OS poll instance or its waker cannot be
    /// created.
    pub fn new(batch_size: usize) -> Result<(Arc<Self>, Poller<D>), QueueError> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), USER_TOKEN)?;
        let queue = Arc::new(Self {
            waker,
            state: Mutex::new(State {
                registrations: HashMap::new(),
                closed: false,
            }),
            fired: SegQueue::new(),
        });

        let poller = Poller {
            poll,
            events: Events::with_capacity(4),
            queue: queue.clone(),
            batch_size: batch_size.max(1),
        };

        Ok((queue, poller))
    }

    /// Arms a one-shot event for `ident`, owning `udata` until delivery.
    ///
    /// Registering an identity that is already armed replaces its data but
    /// keeps a pending trigger.
    pub fn register_oneshot(&self, ident: Ident, udata: Option<D>) -> Result<(), QueueError> {
        let mut state = self.lock();
        if state.closed {
            return Err(QueueError::Closed);
        }

        match state.registrations.entry(ident) {
            Entry::Occupied(mut entry) => entry.get_mut().udata = udata,
            Entry::Vacant(entry) => {
                entry.insert(Registration {
                    udata,
                    triggered: false,
                });
            }
        }
        Ok(())
    }

    /// Fires the event registered for `ident`.
    ///
    /// Triggering an event that already fired but was not delivered yet is a
    /// no-op; it is still delivered once.
    pub fn trigger(&self, ident: Ident) -> Result<(), QueueError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }

            let registration = state
                .registrations
                .get_mut(&ident)
                .ok_or(QueueError::NotRegistered(ident))?;
            if registration.triggered {
                return Ok(());
            }
            registration.triggered = true;
        }

        self.fired.push(ident);
        self.waker.wake()?;
        Ok(())
    }

    /// Closes the queue.
    ///
    /// Pending registrations are dropped without being delivered and a blocked
    /// [`Poller::wait`] returns [`QueueError::Closed`]. Closing twice fails.
    pub fn close(&self) -> Result<(), QueueError> {
        let abandoned: Vec<Registration<D>> = {
            let mut state = self.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            state.closed = true;
            state.registrations.drain().map(|(_, r)| r).collect()
        };

        while self.fired.pop().is_some() {}
        drop(abandoned);

        self.waker.wake()?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of armed events that have not been delivered.
    pub fn pending(&self) -> usize {
        self.lock().registrations.len()
    }

    fn lock(&self) -> MutexGuard<'_, State<D>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The consumer side of an [`EventQueue`].
pub struct Poller<D> {
    poll: Poll,
    events: Events,
    queue: Arc<EventQueue<D>>,
    batch_size: usize,
}

impl<D> Poller<D> {
    /// Blocks until at least one event is ready and returns up to `batch_size`
    /// of them, in trigger order.
    ///
    /// Each delivered event is disarmed: triggering it again fails with
    /// [`QueueError::NotRegistered`] until it is registered again.
    pub fn wait(&mut self) -> Result<Vec<Event<D>>, QueueError> {
        loop {
            let batch = self.drain()?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            // Block here until a trigger or close wakes us.
            if let Err(e) = self.poll.poll(&mut self.events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }
            counter!("evq_wakeups_total").increment(1);
        }
    }

    fn drain(&self) -> Result<Vec<Event<D>>, QueueError> {
        let mut state = self.queue.lock();
        if state.closed {
            return Err(QueueError::Closed);
        }

        let mut batch = Vec::new();
        while batch.len() < self.batch_size {
            let Some(ident) = self.queue.fired.pop() else {
                break;
            };
            if let Some(registration) = state.registrations.remove(&ident) {
                batch.push(Event {
                    ident,
                    filter: Filter::User,
                    udata: registration.udata,
                });
            }
        }
        Ok(batch)
    }
}
