//! Alarm step.

use crate::completion::{CompletionQueue, Tag};
use crate::runtime::ExecutionContext;
use crate::step::{Arm, Canceller, Flow, Stage, Step};

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Step that completes with `true` at its deadline, or `false` once cancelled.
///
/// # Example
/// ```ignore
/// let handle = submit(&ctx, Timer::after(&ctx, Duration::from_secs(5)), |_, fired| {
///     assert!(!fired);
/// });
/// handle.cancel();
/// ctx.run();
/// ```
pub struct Timer {
    deadline: Instant,
    armed: Rc<Cell<Option<Tag>>>,
    queue: Arc<dyn CompletionQueue>,
}

impl Timer {
    pub fn new(context: &ExecutionContext, deadline: Instant) -> Self {
        Self {
            deadline,
            armed: Rc::new(Cell::new(None)),
            queue: context.completion_queue().clone(),
        }
    }

    pub fn after(context: &ExecutionContext, duration: Duration) -> Self {
        Self::new(context, Instant::now() + duration)
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl Step for Timer {
    type Output = bool;

    fn initiate(&mut self, arm: &mut Arm<'_>) -> Flow<bool> {
        let tag = arm.tag(Stage::INITIAL);
        self.armed.set(Some(tag));
        self.queue.post_at(tag, self.deadline);

        Flow::Pending
    }

    fn done(&mut self, _stage: Stage, ok: bool, _arm: &mut Arm<'_>) -> Flow<bool> {
        self.armed.set(None);
        Flow::Complete(ok)
    }

    fn canceller(&self) -> Option<Canceller> {
        let armed = self.armed.clone();
        let queue = self.queue.clone();

        Some(Canceller::new(move || {
            if let Some(tag) = armed.get() {
                queue.cancel(tag);
            }
        }))
    }
}
