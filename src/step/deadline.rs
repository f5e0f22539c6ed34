//! Racing a step against a deadline.

use crate::runtime::ExecutionContext;
use crate::step::{Step, StepHandle, Timer, submit};

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;
use tracing::debug;

/// Output of a step raced against a deadline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timed<T> {
    pub output: T,
    /// The deadline passed before the step settled and cancellation was requested.
    pub deadline_expired: bool,
}

/// Runs `step` with a [`Timer`] for `deadline`; whichever finishes first cancels the other.
///
/// Cancelling the step is best effort: `on_done` still receives whatever output the step
/// completes with, together with whether the deadline expired first.
///
/// # Example
/// ```ignore
/// with_deadline(&ctx, rpc_step, Instant::now() + Duration::from_secs(1), |_, timed| {
///     if timed.deadline_expired {
///         println!("timed out");
///     }
/// });
/// ```
pub fn with_deadline<S, F>(
    context: &ExecutionContext,
    step: S,
    deadline: Instant,
    on_done: F,
) -> StepHandle
where
    S: Step,
    F: FnOnce(&ExecutionContext, Timed<S::Output>) + 'static,
{
    let settled = Rc::new(Cell::new(false));
    let expired = Rc::new(Cell::new(false));

    let timer = {
        let settled = settled.clone();
        let expired = expired.clone();
        let step_canceller = step.canceller();

        submit(
            context,
            Timer::new(context, deadline),
            move |_: &ExecutionContext, fired: bool| {
                if !fired || settled.get() {
                    return;
                }

                debug!("deadline expired, cancelling step");
                expired.set(true);
                if let Some(canceller) = step_canceller {
                    canceller.cancel();
                }
            },
        )
    };

    submit(context, step, move |context: &ExecutionContext, output| {
        settled.set(true);
        timer.cancel();

        on_done(
            context,
            Timed {
                output,
                deadline_expired: expired.get(),
            },
        );
    })
}
