//! Body of the event loop thread.
//!
//! The worker blocks in [`Poller::wait`], then walks the returned batch in
//! delivery order: the shutdown identity ends the loop, a payload is run, and
//! anything else is logged and skipped.

use metrics::counter;
use std::ops::ControlFlow;
use tracing::{debug, error, info, trace, warn};

use crate::error::QueueError;
use crate::reactor::{Event, Filter, Poller};
use crate::task::{Outcome, Payload};

/// Counters collected by one run of the event loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    /// Batches returned by the queue.
    pub batches: u64,
    /// Payloads that ran to completion.
    pub completed: u64,
    /// Payloads whose closure panicked.
    pub panicked: u64,
    /// Events with an unrecognized identity or filter.
    pub unknown: u64,
    /// Payloads delivered in the same batch as, but after, the shutdown event.
    pub abandoned: u64,
}

pub(crate) struct Worker {
    poller: Poller<Payload>,
    stats: LoopStats,
}

impl Worker {
    pub fn new(poller: Poller<Payload>) -> Self {
        Self {
            poller,
            stats: LoopStats::default(),
        }
    }

    /// Runs until shutdown is observed or the queue fails.
    pub fn run(mut self) -> Result<LoopStats, QueueError> {
        match self.run_loop() {
            Ok(()) => {
                info!(stats = ?self.stats, "event loop stopped");
                Ok(self.stats)
            }
            Err(err) => {
                error!(%err, stats = ?self.stats, "event loop failed");
                Err(err)
            }
        }
    }

    fn run_loop(&mut self) -> Result<(), QueueError> {
        loop {
            let batch = self.poller.wait()?;
            self.stats.batches += 1;
            debug!(events = batch.len(), "event loop woke");

            let mut events = batch.into_iter();
            while let Some(event) = events.next() {
                if self.handle(event).is_break() {
                    // The rest of the batch is dropped here without running.
                    let abandoned = events.filter(|e| e.udata.is_some()).count() as u64;
                    if abandoned > 0 {
                        warn!(abandoned, "tasks abandoned by shutdown");
                    }
                    self.stats.abandoned += abandoned;
                    return Ok(());
                }
            }
        }
    }

    fn handle(&mut self, event: Event<Payload>) -> ControlFlow<()> {
        match event {
            Event { ident, .. } if ident.is_shutdown() => {
                debug!("shutdown observed");
                ControlFlow::Break(())
            }
            Event {
                filter: Filter::User,
                udata: Some(payload),
                ..
            } => {
                self.execute(payload);
                ControlFlow::Continue(())
            }
            Event { ident, filter, .. } => {
                warn!(%ident, ?filter, "unknown event");
                counter!("evq_unknown_events_total").increment(1);
                self.stats.unknown += 1;
                ControlFlow::Continue(())
            }
        }
    }

    fn execute(&mut self, payload: Payload) {
        let ident = payload.ident();
        let outcome = payload.run();

        match outcome {
            Outcome::Completed => {
                trace!(%ident, "task completed");
                counter!("evq_tasks_completed_total").increment(1);
                self.stats.completed += 1;
            }
            Outcome::Panicked => {
                debug!(%ident, "task panicked");
                counter!("evq_tasks_panicked_total").increment(1);
                self.stats.panicked += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::error::DispatchError;
    use crate::executor::EventLoop;
    use crate::reactor::{EventQueue, Ident};
    use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn metric_values(snapshotter: &Snapshotter) -> HashMap<String, f64> {
        snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(key, _, _, value)| {
                let value = match value {
                    DebugValue::Counter(n) => n as f64,
                    DebugValue::Gauge(g) => g.into_inner(),
                    DebugValue::Histogram(_) => f64::NAN,
                };
                (key.key().name().to_owned(), value)
            })
            .collect()
    }

    fn start(batch_size: usize) -> (Arc<Dispatcher>, EventLoop) {
        let (queue, poller) = EventQueue::new(batch_size).unwrap();
        let event_loop = EventLoop::start("evq-test", poller).unwrap();
        (Arc::new(Dispatcher::new(queue)), event_loop)
    }

    #[test]
    fn runs_tasks_until_shutdown() {
        let (dispatcher, event_loop) = start(10);
        let handles: Vec<_> = (0..5u32)
            .map(|i| dispatcher.dispatch(move || i + 100).unwrap())
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.wait().unwrap()).collect();
        assert_eq!(results, vec![100, 101, 102, 103, 104]);

        dispatcher.cancel().unwrap();
        let stats = event_loop.join().unwrap();
        assert_eq!(stats.completed, 5);
        assert_eq!(stats.panicked, 0);
        assert!(stats.batches >= 1);
    }

    #[test]
    fn unknown_event_is_skipped() {
        let (dispatcher, event_loop) = start(10);
        let queue = dispatcher.queue();
        queue.register_oneshot(Ident(u64::MAX), None).unwrap();
        queue.trigger(Ident(u64::MAX)).unwrap();

        assert_eq!(dispatcher.call(|| 7).unwrap(), 7);

        dispatcher.cancel().unwrap();
        let stats = event_loop.join().unwrap();
        assert_eq!(stats.unknown, 1);
        assert_eq!(stats.completed, 1);
    }

    #[test]
    fn panicking_task_does_not_stop_the_loop() {
        let (dispatcher, event_loop) = start(10);
        let bad = dispatcher.dispatch(|| -> u8 { panic!("bad task") }).unwrap();
        let good = dispatcher.dispatch(|| 1u8).unwrap();

        assert!(matches!(bad.wait(), Err(DispatchError::Panicked { .. })));
        assert_eq!(good.wait().unwrap(), 1);

        dispatcher.cancel().unwrap();
        let stats = event_loop.join().unwrap();
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.completed, 1);
    }

    #[test]
    fn tasks_after_shutdown_in_same_batch_are_abandoned() {
        let (queue, poller) = EventQueue::new(10).unwrap();
        let dispatcher = Dispatcher::new(queue);
        let before = dispatcher.dispatch(|| 1).unwrap();
        dispatcher.cancel().unwrap();
        let after = dispatcher.dispatch(|| 2).unwrap();

        // All three events are already fired, so the first wait returns them
        // as one batch: task, shutdown, task.
        let stats = Worker::new(poller).run().unwrap();
        assert_eq!(stats.batches, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.abandoned, 1);
        assert_eq!(before.wait().unwrap(), 1);
        assert!(matches!(after.wait(), Err(DispatchError::Abandoned)));
    }

    #[test]
    fn closing_the_queue_fails_the_loop() {
        let (dispatcher, event_loop) = start(10);
        dispatcher.queue().close().unwrap();
        assert!(matches!(event_loop.join(), Err(QueueError::Closed)));
    }

    #[test]
    fn pending_gauge_drains_when_shutdown_abandons_tasks() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            // One batch holds task, shutdown, task; the last task stays queued.
            let (queue, poller) = EventQueue::new(3).unwrap();
            let dispatcher = Dispatcher::new(queue);
            let ran = dispatcher.dispatch(|| 1).unwrap();
            dispatcher.cancel().unwrap();
            let dropped_by_loop = dispatcher.dispatch(|| 2).unwrap();
            let dropped_by_close = dispatcher.dispatch(|| 3).unwrap();

            let stats = Worker::new(poller).run().unwrap();
            assert_eq!(stats.completed, 1);
            assert_eq!(stats.abandoned, 1);
            assert_eq!(dispatcher.queue().pending(), 1);
            dispatcher.queue().close().unwrap();

            assert_eq!(ran.wait().unwrap(), 1);
            assert!(matches!(dropped_by_loop.wait(), Err(DispatchError::Abandoned)));
            assert!(matches!(dropped_by_close.wait(), Err(DispatchError::Abandoned)));
        });

        let values = metric_values(&snapshotter);
        assert_eq!(values["evq_tasks_pending_current"], 0.0);
        assert_eq!(values["evq_tasks_dispatched_total"], 3.0);
        assert_eq!(values["evq_tasks_completed_total"], 1.0);
    }
}
