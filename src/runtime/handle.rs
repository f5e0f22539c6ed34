//! State shared between an execution context and the threads that submit work to it.
//!
//! Everything here is `Send + Sync`: the outstanding-work counter, the stop and
//! shutdown flags, the remote work queue and the completion queue. The thread-confined
//! part of the context lives in [`ExecutionContext`](crate::ExecutionContext) itself.

use crate::completion::{CompletionQueue, Tag};
use crate::error::SubmitError;
use crate::runtime::atomic_queue::AtomicIntrusiveQueue;
use crate::runtime::context::running_in_this_thread;
use crate::runtime::operation::RemoteCallback;
use crate::runtime::ExecutionContext;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use tracing::trace;

pub(crate) struct Shared {
    outstanding_work: AtomicIsize,
    stopped: AtomicBool,
    shutdown: AtomicBool,
    multithreaded: bool,
    pub(crate) remote: AtomicIntrusiveQueue<RemoteCallback>,
    pub(crate) queue: Arc<dyn CompletionQueue>,
}

impl Shared {
    pub(crate) fn new(queue: Arc<dyn CompletionQueue>, multithreaded: bool) -> Self {
        Self {
            outstanding_work: AtomicIsize::new(0),
            stopped: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            multithreaded,
            remote: AtomicIntrusiveQueue::new(false),
            queue,
        }
    }

    /// Identity of the owning context, used by the thread-local run marker.
    pub(crate) fn id(&self) -> usize {
        self as *const Self as usize
    }

    pub(crate) fn is_multithreaded(&self) -> bool {
        self.multithreaded
    }

    /// Requests the run loop to return.
    ///
    /// Only the call that flips the flag wakes a loop blocked on another thread, and
    /// only if the remote queue was idle: otherwise a wake-up is already on its way and
    /// the loop re-reads the flag after draining the remote queue.
    pub(crate) fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        if !running_in_this_thread(self.id()) && self.remote.try_mark_active() {
            trace!("waking run loop to observe stop");
            self.wake();
        }
    }

    // Entering a run with no outstanding work stops without waking anyone.
    pub(crate) fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub(crate) fn reset(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub(crate) fn work_started(&self) {
        self.outstanding_work.fetch_add(1, Ordering::Relaxed);
    }

    /// Reaching zero outstanding work stops the context.
    pub(crate) fn work_finished(&self) {
        if self.outstanding_work.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.stop();
        }
    }

    pub(crate) fn outstanding_work(&self) -> isize {
        self.outstanding_work.load(Ordering::Acquire)
    }

    pub(crate) fn post_remote(&self, callback: RemoteCallback) -> Result<(), SubmitError> {
        if self.is_shut_down() {
            return Err(SubmitError::ShutDown);
        }

        self.work_started();
        if self.remote.push(callback) {
            self.wake();
        }

        Ok(())
    }

    fn wake(&self) {
        self.queue.post(Tag::WAKE);
    }
}

/// Thread-safe handle for submitting work to an [`ExecutionContext`] from any thread.
///
/// Work posted through a handle is queued on a lock-free queue and moved onto the
/// context's local queue by the thread running it, preserving per-producer order.
///
/// # Example
/// ```ignore
/// let handle = ctx.handle();
/// std::thread::spawn(move || {
///     handle.post(|ctx| ctx.stop()).unwrap();
/// });
/// ctx.run();
/// ```
#[derive(Clone)]
pub struct RemoteHandle {
    pub(crate) shared: Arc<Shared>,
}

impl RemoteHandle {
    /// Submits `function` to run on the context's thread.
    ///
    /// # Returns
    /// `Err(SubmitError::ShutDown)` once the context is being destroyed; the function is
    /// dropped without running.
    pub fn post<F>(&self, function: F) -> Result<(), SubmitError>
    where
        F: FnOnce(&ExecutionContext) + Send + 'static,
    {
        self.shared
            .post_remote(Box::new(move |context: &ExecutionContext, _ok: bool| {
                function(context)
            }))
    }

    /// Requests the context to stop; see [`ExecutionContext::stop`].
    pub fn stop(&self) {
        self.shared.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// Adds one unit of outstanding work, keeping `run` from returning for lack of work.
    pub fn work_started(&self) {
        self.shared.work_started();
    }

    /// Removes one unit of outstanding work; the context stops when none is left.
    pub fn work_finished(&self) {
        self.shared.work_finished();
    }

    pub fn outstanding_work(&self) -> isize {
        self.shared.outstanding_work()
    }
}

impl fmt::Debug for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHandle")
            .field("id", &format_args!("{:#x}", self.shared.id()))
            .field("stopped", &self.shared.is_stopped())
            .field("outstanding_work", &self.shared.outstanding_work())
            .finish()
    }
}
