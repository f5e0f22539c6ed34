//! In-process completion queue.
//!
//! Events are kept in a FIFO guarded by a `parking_lot` mutex; a condition variable
//! wakes the thread blocked in [`next`](CompletionQueue::next). Alarms registered with
//! [`post_at`](CompletionQueue::post_at) live in a deadline-ordered map and are moved
//! into the event FIFO once due, so a blocked waiter only ever sleeps until the earlier
//! of its own deadline and the next alarm.

use crate::completion::{CompletionQueue, Deadline, QueueEvent, Tag};

use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Instant;
use tracing::warn;

/// Completion queue backed by a mutex-protected FIFO and a deadline-ordered alarm map.
///
/// Transports (and tests) deliver completions with [`complete`](InProcessQueue::complete).
///
/// # Example
/// ```ignore
/// let queue = Arc::new(InProcessQueue::new());
/// let ctx = ContextBuilder::new().completion_queue(queue.clone()).build();
/// let tag = ctx.register(|_, ok| assert!(ok));
/// queue.complete(tag, true);
/// assert!(ctx.run());
/// ```
#[derive(Default)]
pub struct InProcessQueue {
    state: Mutex<State>,
    ready: Condvar,
}

#[derive(Default)]
struct State {
    events: VecDeque<(Tag, bool)>,
    alarms: BTreeMap<(Instant, u64), Tag>,
    armed: HashMap<Tag, (Instant, u64)>,
    sequence: u64,
    shutdown: bool,
}

impl State {
    // Moves every alarm whose deadline has passed into the event FIFO.
    fn fire_due_alarms(&mut self, now: Instant) {
        while let Some(entry) = self.alarms.first_entry() {
            if entry.key().0 > now {
                break;
            }

            let tag = entry.remove();
            self.armed.remove(&tag);
            self.events.push_back((tag, true));
        }
    }

    fn next_alarm(&self) -> Option<Instant> {
        self.alarms.keys().next().map(|(at, _)| *at)
    }
}

impl InProcessQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers a completion for `tag`.
    ///
    /// Completions arriving after [`shutdown`](CompletionQueue::shutdown) are dropped.
    pub fn complete(&self, tag: Tag, ok: bool) {
        let mut state = self.state.lock();
        if state.shutdown {
            warn!(?tag, ok, "completion delivered after shutdown, dropped");
            return;
        }

        state.events.push_back((tag, ok));
        drop(state);

        self.ready.notify_one();
    }

    /// Number of events ready to be returned by `next`.
    pub fn pending_events(&self) -> usize {
        self.state.lock().events.len()
    }

    /// Number of alarms that have not fired yet.
    pub fn pending_alarms(&self) -> usize {
        self.state.lock().alarms.len()
    }

    /// Returns `true` once [`shutdown`](CompletionQueue::shutdown) was called.
    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }
}

impl CompletionQueue for InProcessQueue {
    fn next(&self, deadline: Deadline) -> QueueEvent {
        let mut state = self.state.lock();

        loop {
            let now = Instant::now();
            state.fire_due_alarms(now);

            if let Some((tag, ok)) = state.events.pop_front() {
                return QueueEvent::Completed { tag, ok };
            }

            // Alarms are cancelled at shutdown, so nothing can arrive any more.
            if state.shutdown {
                return QueueEvent::Shutdown;
            }

            let wake_at = match (deadline, state.next_alarm()) {
                (Deadline::Immediate, _) => return QueueEvent::Timeout,
                (Deadline::At(at), _) if at <= now => return QueueEvent::Timeout,
                (Deadline::At(at), Some(alarm)) => Some(at.min(alarm)),
                (Deadline::At(at), None) => Some(at),
                (Deadline::Never, alarm) => alarm,
            };

            match wake_at {
                Some(at) => {
                    self.ready.wait_until(&mut state, at);
                }
                None => self.ready.wait(&mut state),
            }
        }
    }

    fn post(&self, tag: Tag) {
        self.complete(tag, true);
    }

    fn post_at(&self, tag: Tag, deadline: Instant) {
        let mut state = self.state.lock();
        if state.shutdown {
            warn!(?tag, "alarm set after shutdown, dropped");
            return;
        }

        let key = (deadline, state.sequence);
        state.sequence = state.sequence.wrapping_add(1);
        state.alarms.insert(key, tag);
        state.armed.insert(tag, key);
        drop(state);

        // A waiter may be sleeping past this deadline.
        self.ready.notify_all();
    }

    fn cancel(&self, tag: Tag) -> bool {
        let mut state = self.state.lock();
        let Some(key) = state.armed.remove(&tag) else {
            return false;
        };

        state.alarms.remove(&key);
        state.events.push_back((tag, false));
        drop(state);

        self.ready.notify_one();
        true
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.shutdown {
            return;
        }
        state.shutdown = true;

        let alarms = std::mem::take(&mut state.alarms);
        state.armed.clear();
        state
            .events
            .extend(alarms.into_values().map(|tag| (tag, false)));
        drop(state);

        self.ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_events_are_returned_in_delivery_order() {
        let queue = InProcessQueue::new();
        queue.complete(Tag::from_raw(1), true);
        queue.complete(Tag::from_raw(2), false);

        assert_eq!(
            queue.next(Deadline::Immediate),
            QueueEvent::Completed {
                tag: Tag::from_raw(1),
                ok: true
            }
        );
        assert_eq!(
            queue.next(Deadline::Immediate),
            QueueEvent::Completed {
                tag: Tag::from_raw(2),
                ok: false
            }
        );
        assert_eq!(queue.next(Deadline::Immediate), QueueEvent::Timeout);
    }

    #[test]
    fn test_alarms_fire_in_deadline_order() {
        let queue = InProcessQueue::new();
        let now = Instant::now();
        queue.post_at(Tag::from_raw(1), now + Duration::from_millis(20));
        queue.post_at(Tag::from_raw(2), now + Duration::from_millis(5));

        let first = queue.next(Deadline::Never);
        let second = queue.next(Deadline::Never);

        assert_eq!(
            first,
            QueueEvent::Completed {
                tag: Tag::from_raw(2),
                ok: true
            }
        );
        assert_eq!(
            second,
            QueueEvent::Completed {
                tag: Tag::from_raw(1),
                ok: true
            }
        );
        assert!(now.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_bounded_wait_times_out() {
        let queue = InProcessQueue::new();
        let start = Instant::now();

        assert_eq!(
            queue.next(Deadline::after(Duration::from_millis(15))),
            QueueEvent::Timeout
        );
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_shutdown_drains_then_reports_shutdown() {
        let queue = InProcessQueue::new();
        queue.complete(Tag::from_raw(1), true);
        queue.post_at(Tag::from_raw(2), Instant::now() + Duration::from_secs(60));

        queue.shutdown();
        queue.complete(Tag::from_raw(3), true);

        assert!(queue.is_shutdown());
        assert_eq!(
            queue.next(Deadline::Never),
            QueueEvent::Completed {
                tag: Tag::from_raw(1),
                ok: true
            }
        );
        assert_eq!(
            queue.next(Deadline::Never),
            QueueEvent::Completed {
                tag: Tag::from_raw(2),
                ok: false
            }
        );
        assert_eq!(queue.next(Deadline::Never), QueueEvent::Shutdown);
        assert_eq!(queue.next(Deadline::Immediate), QueueEvent::Shutdown);
    }

    #[test]
    fn test_post_from_other_thread_wakes_waiter() {
        let queue = Arc::new(InProcessQueue::new());
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                queue.post(Tag::from_raw(9));
            })
        };

        assert_eq!(
            queue.next(Deadline::Never),
            QueueEvent::Completed {
                tag: Tag::from_raw(9),
                ok: true
            }
        );
        producer.join().unwrap();
    }
}
