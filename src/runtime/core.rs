//! Execution context: the run loop that drives local work, remote work and completions.
//!
//! One pass of the loop
//!
//! 1. moves the remote queue onto the local queue if a wake-up was seen, marking the
//!    remote queue inactive again,
//! 2. runs the snapshot of the local queue taken at this point; work queued by those
//!    callbacks runs on the next pass,
//! 3. polls the completion queue once, without blocking when local work is pending,
//!    and invokes the operation the delivered tag names.
//!
//! Passes repeat until the context is stopped or a pass makes no progress. Running out
//! of outstanding work stops the context.

use crate::builder::ContextBuilder;
use crate::completion::{CompletionQueue, Deadline, QueueEvent, Tag};
use crate::runtime::context::{ContextGuard, enter_context, running_in_this_thread};
use crate::runtime::handle::{RemoteHandle, Shared};
use crate::runtime::operation::{Callback, OperationKey, Slot};
use crate::runtime::pool::{Allocator, ArenaPool, PoolStats};
use crate::runtime::queue::IntrusiveQueue;

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Single-threaded completion-queue execution context.
///
/// Owns a completion queue, a local FIFO of ready callbacks and a lock-free queue for
/// work submitted from other threads (see [`RemoteHandle`]). All callbacks run on the
/// thread calling one of the run methods, and receive the context by reference so
/// they can queue follow-up work.
///
/// The context is not `Send`: it lives on the thread that runs it. Other threads
/// interact with it through [`handle`](ExecutionContext::handle).
///
/// # Example
/// ```ignore
/// let ctx = ExecutionContext::new();
/// ctx.post(|ctx| {
///     ctx.post(|_| println!("second"));
///     println!("first");
/// });
/// assert!(ctx.run());
/// ```
pub struct ExecutionContext {
    shared: Arc<Shared>,
    local: RefCell<LocalState>,
}

pub(crate) struct LocalState {
    pool: ArenaPool,
    queue: IntrusiveQueue<OperationKey>,
    check_remote_work: bool,
    allocator: Allocator,
    pub(crate) notify: HashSet<OperationKey>,
}

/// Operation slot reserved for a completion-queue tag whose callback is not known yet.
///
/// Holds one unit of outstanding work until it is either installed or abandoned.
#[must_use = "a reservation holds outstanding work until installed or abandoned"]
pub(crate) struct Reservation {
    key: OperationKey,
}

impl Reservation {
    pub(crate) fn tag(&self) -> Tag {
        self.key.tag()
    }

    pub(crate) fn key(&self) -> OperationKey {
        self.key
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    /// Local, remote and completion-queue work.
    Full,
    /// Completion-queue events only.
    CompletionQueue,
}

#[derive(Clone, Copy, Debug, Default)]
struct Tick {
    remote: bool,
    local: bool,
    event: bool,
    woke: bool,
    more_pending: bool,
}

impl Tick {
    fn progressed(&self) -> bool {
        self.remote || self.local || self.event || self.woke
    }

    fn processed(&self, mode: Mode) -> bool {
        match mode {
            Mode::Full => self.local || self.event,
            Mode::CompletionQueue => self.event,
        }
    }

    fn until_idle(self) -> ControlFlow<Tick, Tick> {
        if self.progressed() {
            ControlFlow::Continue(self)
        } else {
            ControlFlow::Break(self)
        }
    }
}

impl ExecutionContext {
    /// Creates a context with the default configuration.
    pub fn new() -> Self {
        ContextBuilder::new().build()
    }

    /// Returns a builder for a customized context.
    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    pub(crate) fn with_config(
        queue: Arc<dyn CompletionQueue>,
        arenas: u16,
        arena_capacity: usize,
        multithreaded: bool,
    ) -> Self {
        Self {
            shared: Arc::new(Shared::new(queue, multithreaded)),
            local: RefCell::new(LocalState {
                pool: ArenaPool::new(arenas, arena_capacity),
                queue: IntrusiveQueue::new(),
                check_remote_work: false,
                allocator: Allocator::HEAP,
                notify: HashSet::new(),
            }),
        }
    }

    /// Runs until stopped or out of work.
    ///
    /// Blocks in the completion queue while only completion-queue work is outstanding.
    ///
    /// # Returns
    /// `true` if at least one operation was processed.
    pub fn run(&self) -> bool {
        self.process_work(Mode::Full, |context| {
            context.do_one(Deadline::Never, Mode::Full).until_idle()
        })
    }

    /// Runs until stopped, out of work, or `deadline` passes without an event.
    pub fn run_until(&self, deadline: Instant) -> bool {
        self.process_work(Mode::Full, |context| {
            context.do_one(Deadline::At(deadline), Mode::Full).until_idle()
        })
    }

    /// Runs while `condition` holds, checked before every pass.
    pub fn run_while(&self, mut condition: impl FnMut() -> bool) -> bool {
        self.process_work(Mode::Full, |context| {
            if !condition() {
                return ControlFlow::Break(Tick::default());
            }
            context.do_one(Deadline::Never, Mode::Full).until_idle()
        })
    }

    /// Processes ready work without blocking.
    pub fn poll(&self) -> bool {
        self.process_work(Mode::Full, |context| {
            context.do_one(Deadline::Immediate, Mode::Full).until_idle()
        })
    }

    /// Like [`run`](Self::run), but only completion-queue events are handled.
    ///
    /// # Returns
    /// `true` if at least one completion event was handled.
    pub fn run_completion_queue(&self) -> bool {
        self.process_work(Mode::CompletionQueue, |context| {
            context
                .do_one(Deadline::Never, Mode::CompletionQueue)
                .until_idle()
        })
    }

    /// Like [`poll`](Self::poll), but only completion-queue events are handled.
    pub fn poll_completion_queue(&self) -> bool {
        self.process_work(Mode::CompletionQueue, |context| {
            context
                .do_one(Deadline::Immediate, Mode::CompletionQueue)
                .until_idle()
        })
    }

    /// Requests the run loop to return as soon as possible.
    ///
    /// Safe to call from callbacks; from other threads use [`RemoteHandle::stop`].
    /// Idempotent.
    pub fn stop(&self) {
        debug!("stop requested");
        self.shared.stop();
    }

    /// Clears the stopped flag so the context can run again.
    pub fn reset(&self) {
        self.shared.reset();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// Adds one unit of outstanding work.
    pub fn work_started(&self) {
        self.shared.work_started();
    }

    /// Removes one unit of outstanding work; reaching zero stops the context.
    pub fn work_finished(&self) {
        self.shared.work_finished();
    }

    pub fn outstanding_work(&self) -> isize {
        self.shared.outstanding_work()
    }

    /// Returns a thread-safe handle for remote submission and stopping.
    pub fn handle(&self) -> RemoteHandle {
        RemoteHandle {
            shared: self.shared.clone(),
        }
    }

    /// The completion queue this context polls.
    pub fn completion_queue(&self) -> &Arc<dyn CompletionQueue> {
        &self.shared.queue
    }

    /// Whether the context was built for a concurrency hint above one.
    pub fn is_multithreaded(&self) -> bool {
        self.shared.is_multithreaded()
    }

    /// Allocation source of the current run. Outside of a run this is the heap fallback.
    pub fn allocator(&self) -> Allocator {
        self.local.borrow().allocator
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.local.borrow().pool.stats()
    }

    /// Queues `function` on the local queue.
    ///
    /// Must be called on the thread that owns the context. The function runs exactly
    /// once, on a later pass of the run loop.
    pub fn post<F>(&self, function: F)
    where
        F: FnOnce(&ExecutionContext) + 'static,
    {
        self.work_started();
        self.enqueue(Box::new(move |context: &ExecutionContext, _ok: bool| {
            function(context)
        }));
    }

    /// Registers `callback` for the completion-queue tag returned.
    ///
    /// The callback runs once the tag is delivered through the completion queue, with the
    /// event's `ok` flag. Each tag must be delivered exactly once.
    ///
    /// # Example
    /// ```ignore
    /// let tag = ctx.register(|_, ok| assert!(ok));
    /// ctx.completion_queue().post(tag);
    /// ctx.run();
    /// ```
    pub fn register<F>(&self, callback: F) -> Tag
    where
        F: FnOnce(&ExecutionContext, bool) + 'static,
    {
        let reservation = self.reserve();
        let tag = reservation.tag();
        self.install(reservation, Box::new(callback));

        tag
    }

    /// Queues an already counted callback. The callback is invoked with `ok == true`.
    pub(crate) fn enqueue(&self, callback: Callback) {
        let mut state = self.local.borrow_mut();
        let state = &mut *state;

        let key = state.pool.allocate(state.allocator, Some(callback));
        state.queue.push_back(&mut state.pool, key);
    }

    pub(crate) fn reserve(&self) -> Reservation {
        self.work_started();

        let mut state = self.local.borrow_mut();
        let state = &mut *state;
        let key = state.pool.allocate(state.allocator, None);

        Reservation { key }
    }

    pub(crate) fn install(&self, reservation: Reservation, callback: Callback) {
        let installed = self
            .local
            .borrow_mut()
            .pool
            .install(reservation.key, callback);

        if !installed {
            warn!(tag = ?reservation.tag(), "operation completed before its callback was installed");
        }
    }

    /// Releases a reservation whose tag was never handed to the completion queue.
    pub(crate) fn abandon(&self, reservation: Reservation) {
        let released = self.local.borrow_mut().pool.release(reservation.key);
        if released.is_some() {
            self.work_finished();
        }
    }

    pub(crate) fn local_state(&self) -> &RefCell<LocalState> {
        &self.local
    }

    fn process_work(
        &self,
        mode: Mode,
        mut pass: impl FnMut(&Self) -> ControlFlow<Tick, Tick>,
    ) -> bool {
        let nested = running_in_this_thread(self.shared.id());

        let _session = if nested {
            None
        } else {
            self.shared.reset();
            if self.shared.outstanding_work() == 0 {
                self.shared.mark_stopped();
                debug!(?mode, "no outstanding work, not running");
                return false;
            }
            Some(RunSession::enter(self))
        };

        debug!(?mode, nested, "run loop entered");

        let mut processed = false;
        while !self.shared.is_stopped() {
            match pass(self) {
                ControlFlow::Continue(tick) => processed |= tick.processed(mode),
                ControlFlow::Break(tick) => {
                    processed |= tick.processed(mode);
                    break;
                }
            }
        }

        debug!(?mode, processed, stopped = self.shared.is_stopped(), "run loop exited");
        processed
    }

    fn do_one(&self, deadline: Deadline, mode: Mode) -> Tick {
        let mut tick = Tick::default();

        if self.local.borrow().check_remote_work {
            tick.remote = self.move_remote_work() > 0;
        }

        if mode == Mode::Full {
            tick.local = self.run_local_batch();
        }

        tick.more_pending = mode == Mode::Full && !self.local.borrow().queue.is_empty();

        // Read after the remote queue was marked inactive: a concurrent stop either
        // shows up here or wakes the wait below.
        if self.shared.is_stopped() {
            return tick;
        }

        let deadline = if tick.more_pending {
            Deadline::Immediate
        } else {
            deadline
        };

        match self.shared.queue.next(deadline) {
            QueueEvent::Completed { tag, .. } if tag == Tag::WAKE => {
                trace!("remote work wake-up");
                self.local.borrow_mut().check_remote_work = true;
                tick.woke = true;
                tick.more_pending |= mode == Mode::Full;
            }
            QueueEvent::Completed { tag, ok } => {
                trace!(?tag, ok, "completion event");
                tick.event = true;
                self.complete_tagged(tag, ok);
            }
            QueueEvent::Timeout => {}
            QueueEvent::Shutdown => {
                debug!("completion queue shut down");
                self.shared.stop();
            }
        }

        tick
    }

    // Runs every callback queued before this call. Returns whether any ran.
    fn run_local_batch(&self) -> bool {
        let batch = self.local.borrow_mut().queue.take();
        if batch.is_empty() {
            return false;
        }
        trace!(len = batch.len(), "running local batch");

        let mut pending = PendingBatch {
            context: self,
            batch,
        };

        loop {
            let callback = {
                let mut state = self.local.borrow_mut();
                let state = &mut *state;

                let Some(key) = pending.batch.pop_front(&mut state.pool) else {
                    break;
                };
                state.pool.release(key).and_then(|slot| slot.callback)
            };

            if let Some(callback) = callback {
                self.invoke(callback, true);
            }
        }

        true
    }

    // Returns how many callbacks were moved.
    fn move_remote_work(&self) -> usize {
        let drained = self.shared.remote.take_all_and_mark_inactive();

        let mut state = self.local.borrow_mut();
        let state = &mut *state;
        state.check_remote_work = false;

        let mut moved = 0usize;
        for callback in drained {
            let callback: Callback = callback;
            let key = state.pool.allocate(state.allocator, Some(callback));
            state.queue.push_back(&mut state.pool, key);
            moved += 1;
        }

        trace!(moved, "moved remote work to local queue");
        moved
    }

    fn complete_tagged(&self, tag: Tag, ok: bool) {
        let Some(key) = OperationKey::from_tag(tag) else {
            return;
        };

        let slot = {
            let mut state = self.local.borrow_mut();
            state.notify.remove(&key);
            state.pool.release(key)
        };

        match slot {
            Some(Slot {
                callback: Some(callback),
                ..
            }) => self.invoke(callback, ok),
            Some(_) => {
                warn!(?tag, ok, "completion for an operation without a callback");
                self.work_finished();
            }
            None => warn!(?tag, ok, "completion for an unknown or stale tag"),
        }
    }

    fn invoke(&self, callback: Callback, ok: bool) {
        let _work = WorkGuard(&self.shared);
        callback(self, ok);
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("stopped", &self.shared.is_stopped())
            .field("outstanding_work", &self.shared.outstanding_work())
            .field("multithreaded", &self.shared.is_multithreaded())
            .finish_non_exhaustive()
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.shared.stop();
        self.shared.mark_shutdown();
        self.shared.queue.shutdown();

        let state = self.local.get_mut();

        // Completed operations are released, never invoked.
        let mut abandoned = 0usize;
        loop {
            match self.shared.queue.next(Deadline::Never) {
                QueueEvent::Completed { tag, .. } => {
                    let released = OperationKey::from_tag(tag)
                        .and_then(|key| state.pool.release(key))
                        .is_some();
                    if released {
                        abandoned += 1;
                    }
                }
                QueueEvent::Timeout | QueueEvent::Shutdown => break,
            }
        }

        state.queue = IntrusiveQueue::new();
        state.notify.clear();
        let queued = state.pool.clear();
        let remote = self.shared.remote.take_all_and_mark_inactive().count();

        debug!(abandoned, queued, remote, "execution context destroyed");
    }
}

// Each top-level run marks the context as running on this thread and checks out an arena.
struct RunSession<'a> {
    context: &'a ExecutionContext,
    _guard: ContextGuard,
}

impl<'a> RunSession<'a> {
    fn enter(context: &'a ExecutionContext) -> Self {
        let guard = enter_context(context.shared.id());

        let mut state = context.local.borrow_mut();
        let allocator = state.pool.checkout();
        state.allocator = allocator;
        drop(state);

        Self {
            context,
            _guard: guard,
        }
    }
}

impl Drop for RunSession<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.context.local.try_borrow_mut() {
            let allocator = std::mem::replace(&mut state.allocator, Allocator::HEAP);
            state.pool.checkin(allocator);
        }
    }
}

// Puts callbacks that did not get to run back at the front of the local queue.
struct PendingBatch<'a> {
    context: &'a ExecutionContext,
    batch: IntrusiveQueue<OperationKey>,
}

impl Drop for PendingBatch<'_> {
    fn drop(&mut self) {
        if self.batch.is_empty() {
            return;
        }

        if let Ok(mut state) = self.context.local.try_borrow_mut() {
            let state = &mut *state;

            let mut batch = self.batch.take();
            let later = state.queue.take();
            batch.append(&mut state.pool, later);
            state.queue = batch;
        }
    }
}

struct WorkGuard<'a>(&'a Shared);

impl Drop for WorkGuard<'_> {
    fn drop(&mut self) {
        self.0.work_finished();
    }
}
