//! Completion-event source interface.
//!
//! The execution context never performs I/O itself. Whatever does (a transport, a
//! timer service, a test double) reports finished operations through a
//! [`CompletionQueue`] as `(tag, ok)` pairs, and the run loop maps each tag back to
//! the operation that registered it.
//!
//! - [`Tag`]: opaque identifier handed to the source when an operation is registered
//! - [`Deadline`]: how long a call to [`CompletionQueue::next`] may block
//! - [`QueueEvent`]: what a poll produced
//! - [`InProcessQueue`]: mutex/condvar backed implementation with alarms

pub mod queue;

pub use queue::InProcessQueue;

use std::fmt;
use std::time::{Duration, Instant};

/// Opaque identifier correlating a completion event with the operation that registered it.
///
/// Tags are produced by the execution context; completion sources only store them and
/// hand them back.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(u64);

impl Tag {
    /// Reserved tag used by the context's wake-up alarm.
    pub(crate) const WAKE: Tag = Tag(u64::MAX);

    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub(crate) const fn into_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Tag::WAKE {
            return f.write_str("Tag(wake)");
        }
        write!(f, "Tag({:#x})", self.0)
    }
}

/// Upper bound on how long [`CompletionQueue::next`] may wait for an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Deadline {
    /// Return immediately if no event is ready.
    Immediate,
    /// Wait until the given instant at the latest.
    At(Instant),
    /// Wait until an event arrives or the queue is shut down.
    Never,
}

impl Deadline {
    /// Deadline `duration` from now.
    pub fn after(duration: Duration) -> Self {
        Deadline::At(Instant::now() + duration)
    }
}

/// Result of polling a completion queue once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueEvent {
    /// The operation registered under `tag` finished.
    Completed { tag: Tag, ok: bool },
    /// The deadline passed without an event.
    Timeout,
    /// The queue was shut down and fully drained.
    Shutdown,
}

/// Source of completion events polled by the execution context.
///
/// Implementations must be usable from several threads: producers deliver events
/// while the thread running the context waits in [`next`](CompletionQueue::next).
pub trait CompletionQueue: Send + Sync {
    /// Waits for the next event, bounded by `deadline`.
    ///
    /// After [`shutdown`](CompletionQueue::shutdown) the remaining events are still
    /// returned; once none are left every call returns [`QueueEvent::Shutdown`].
    fn next(&self, deadline: Deadline) -> QueueEvent;

    /// Delivers `(tag, true)` as soon as possible.
    fn post(&self, tag: Tag);

    /// Delivers `(tag, true)` once `deadline` is reached.
    fn post_at(&self, tag: Tag, deadline: Instant);

    /// Cancels a pending [`post_at`](CompletionQueue::post_at), delivering `(tag, false)`
    /// right away. Returns `false` when the alarm already fired or is unknown.
    fn cancel(&self, tag: Tag) -> bool;

    /// Stops accepting new work; pending alarms are cancelled.
    fn shutdown(&self);
}
