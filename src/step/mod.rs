//! Asynchronous step protocol.
//!
//! A step is a small state machine driven by completion-queue tags:
//!
//! 1. [`Step::initiate`] starts the work and arms a tag through [`Arm::tag`], or
//!    completes right away,
//! 2. the run loop waits for the tag,
//! 3. [`Step::done`] receives the stage the tag was armed for and the `ok` flag, and
//!    either completes or arms the next stage.
//!
//! The step object itself stays resident across stages, so multi-stage verbs keep
//! their state without re-allocating. While a stage is armed the step holds one unit of
//! outstanding work on its context.
//!
//! - [`submit`]: drives a step to completion
//! - [`Timer`]: alarm step firing at a deadline
//! - [`with_deadline`]: races a step against a timer, cancelling the loser

mod deadline;
mod timer;

pub use deadline::{Timed, with_deadline};
pub use timer::Timer;

use crate::completion::Tag;
use crate::runtime::{ExecutionContext, Reservation};

use std::fmt;
use std::rc::Rc;
use tracing::error;

/// Sub-state of a multi-stage step, handed back to [`Step::done`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Stage(pub u8);

impl Stage {
    pub const INITIAL: Stage = Stage(0);
}

/// Outcome of driving a step one stage.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow<T> {
    /// A tag was armed; the step continues in [`Step::done`].
    Pending,
    /// The step finished with its public result.
    Complete(T),
}

/// Tag-driven asynchronous operation.
///
/// # Example
/// ```ignore
/// struct Ping;
///
/// impl Step for Ping {
///     type Output = bool;
///
///     fn initiate(&mut self, arm: &mut Arm<'_>) -> Flow<bool> {
///         let tag = arm.tag(Stage::INITIAL);
///         arm.context().completion_queue().post(tag);
///         Flow::Pending
///     }
///
///     fn done(&mut self, _stage: Stage, ok: bool, _arm: &mut Arm<'_>) -> Flow<bool> {
///         Flow::Complete(ok)
///     }
/// }
/// ```
pub trait Step: 'static {
    type Output: 'static;

    /// Starts the operation. Never blocks.
    ///
    /// Returns [`Flow::Pending`] after arming a tag, or completes synchronously,
    /// typically with a failure outcome.
    fn initiate(&mut self, arm: &mut Arm<'_>) -> Flow<Self::Output>;

    /// Handles the completion of the tag armed for `stage`.
    fn done(&mut self, stage: Stage, ok: bool, arm: &mut Arm<'_>) -> Flow<Self::Output>;

    /// Best-effort cancellation hook, racing with completion.
    fn canceller(&self) -> Option<Canceller> {
        None
    }
}

/// Arms completion-queue tags for the stage a step is entering.
pub struct Arm<'a> {
    context: &'a ExecutionContext,
    armed: Option<(Reservation, Stage)>,
}

impl<'a> Arm<'a> {
    fn new(context: &'a ExecutionContext) -> Self {
        Self {
            context,
            armed: None,
        }
    }

    /// Reserves a tag that resumes the step at `stage` once delivered.
    ///
    /// A step arms at most one tag per transition.
    pub fn tag(&mut self, stage: Stage) -> Tag {
        if let Some((earlier, earlier_stage)) = self.armed.take() {
            error!(?earlier_stage, ?stage, "step armed twice in one transition, dropping the earlier tag");
            self.context.abandon(earlier);
        }

        let reservation = self.context.reserve();
        let tag = reservation.tag();
        self.armed = Some((reservation, stage));

        tag
    }

    /// The context driving the step.
    pub fn context(&self) -> &'a ExecutionContext {
        self.context
    }

    fn into_armed(self) -> Option<(Reservation, Stage)> {
        self.armed
    }
}

/// Cloneable cancellation request for an in-flight step.
#[derive(Clone)]
pub struct Canceller(Rc<dyn Fn()>);

impl Canceller {
    pub fn new(cancel: impl Fn() + 'static) -> Self {
        Self(Rc::new(cancel))
    }

    /// Requests cancellation. Whether the step completes cancelled or normally is up to
    /// the race with its completion.
    pub fn cancel(&self) {
        (self.0)()
    }
}

impl fmt::Debug for Canceller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Canceller")
    }
}

/// Handle to a submitted step.
#[derive(Clone, Debug, Default)]
pub struct StepHandle {
    canceller: Option<Canceller>,
}

impl StepHandle {
    /// Requests cancellation; a no-op for steps without a cancellation hook.
    pub fn cancel(&self) {
        if let Some(canceller) = &self.canceller {
            canceller.cancel();
        }
    }

    pub fn is_cancellable(&self) -> bool {
        self.canceller.is_some()
    }
}

/// Starts `step` on `context` and invokes `on_done` with its output.
///
/// `on_done` always runs from the run loop, even when the step completes during
/// initiation.
///
/// # Arguments
/// * `context` - Context whose completion queue drives the step
/// * `step` - The step to run
/// * `on_done` - Receives the step's output exactly once
///
/// # Example
/// ```ignore
/// submit(&ctx, Timer::after(&ctx, Duration::from_millis(5)), |_, fired| assert!(fired));
/// ctx.run();
/// ```
pub fn submit<S, F>(context: &ExecutionContext, step: S, on_done: F) -> StepHandle
where
    S: Step,
    F: FnOnce(&ExecutionContext, S::Output) + 'static,
{
    let canceller = step.canceller();

    let mut operation = Box::new(StepOperation { step, on_done });
    let mut arm = Arm::new(context);
    let flow = operation.step.initiate(&mut arm);
    operation.advance(flow, arm, true);

    StepHandle { canceller }
}

struct StepOperation<S, F> {
    step: S,
    on_done: F,
}

impl<S, F> StepOperation<S, F>
where
    S: Step,
    F: FnOnce(&ExecutionContext, S::Output) + 'static,
{
    fn advance(self: Box<Self>, flow: Flow<S::Output>, arm: Arm<'_>, initiating: bool) {
        let context = arm.context();

        match (flow, arm.into_armed()) {
            (Flow::Complete(output), armed) => {
                if let Some((reservation, _)) = armed {
                    context.abandon(reservation);
                }

                let StepOperation { on_done, .. } = *self;
                if initiating {
                    context.post(move |context| on_done(context, output));
                } else {
                    on_done(context, output);
                }
            }
            (Flow::Pending, Some((reservation, stage))) => {
                context.install(
                    reservation,
                    Box::new(move |context: &ExecutionContext, ok: bool| {
                        self.resume(context, stage, ok)
                    }),
                );
            }
            (Flow::Pending, None) => {
                error!("step returned pending without arming a tag, it will never complete");
            }
        }
    }

    fn resume(mut self: Box<Self>, context: &ExecutionContext, stage: Stage, ok: bool) {
        let mut arm = Arm::new(context);
        let flow = self.step.done(stage, ok, &mut arm);
        self.advance(flow, arm, false);
    }
}
