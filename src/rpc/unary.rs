//! Unary request step.

use crate::rpc::{Slot, Status, StatusCode, UnaryCall};
use crate::runtime::ExecutionContext;
use crate::step::{Arm, Canceller, Flow, Stage, Step, StepHandle, submit};

use std::rc::Rc;

/// Step issuing one unary call and completing with its status.
///
/// The response is written into the slot given at construction. Can be raced against
/// a deadline with [`with_deadline`](crate::with_deadline).
pub struct UnaryRequest<C: UnaryCall> {
    call: Rc<C>,
    request: Option<C::Request>,
    response: Slot<C::Response>,
    status: Slot<Status>,
}

impl<C: UnaryCall> UnaryRequest<C> {
    pub fn new(call: C, request: C::Request, response: Slot<C::Response>) -> Self {
        Self {
            call: Rc::new(call),
            request: Some(request),
            response,
            status: Slot::new(),
        }
    }
}

impl<C> Step for UnaryRequest<C>
where
    C: UnaryCall + 'static,
{
    type Output = Status;

    fn initiate(&mut self, arm: &mut Arm<'_>) -> Flow<Status> {
        let Some(request) = self.request.take() else {
            return Flow::Complete(Status::new(
                StatusCode::FailedPrecondition,
                "unary request already issued",
            ));
        };

        let tag = arm.tag(Stage::INITIAL);
        self.call
            .call(request, self.response.clone(), self.status.clone(), tag);

        Flow::Pending
    }

    // The status carries the outcome; `ok` is not consulted.
    fn done(&mut self, _stage: Stage, _ok: bool, _arm: &mut Arm<'_>) -> Flow<Status> {
        Flow::Complete(
            self.status
                .take()
                .unwrap_or_else(|| Status::unknown("unary call completed without a status")),
        )
    }

    fn canceller(&self) -> Option<Canceller> {
        let call = self.call.clone();
        Some(Canceller::new(move || call.try_cancel()))
    }
}

/// Issues a unary call and invokes `on_done` with its status.
///
/// # Arguments
/// * `context` - Context whose completion queue the transport reports to
/// * `call` - Transport call object
/// * `request` - Request message
/// * `response` - Filled by the transport before the status is reported
/// * `on_done` - Receives the final status
///
/// # Example
/// ```ignore
/// let response = Slot::new();
/// request(&ctx, call, Request { value: 42 }, response.clone(), |_, status| {
///     assert!(status.is_ok());
/// });
/// ctx.run();
/// ```
pub fn request<C, F>(
    context: &ExecutionContext,
    call: C,
    request: C::Request,
    response: Slot<C::Response>,
    on_done: F,
) -> StepHandle
where
    C: UnaryCall + 'static,
    F: FnOnce(&ExecutionContext, Status) + 'static,
{
    submit(context, UnaryRequest::new(call, request, response), on_done)
}
