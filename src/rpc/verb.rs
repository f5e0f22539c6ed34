//! Streaming call verbs as steps.
//!
//! All verbs share one step type. The primary operation runs in stage `PRIMARY`; the
//! remaining stages drive the call to finish:
//!
//! | stage          | entered when                                          |
//! |----------------|-------------------------------------------------------|
//! | `WRITES_DONE`  | finish was requested before writes-done               |
//! | `FINISH`       | an explicit finish was handed to the transport        |
//! | `AUTO_FINISH`  | a primary operation failed and the call must finish   |
//! | `AWAIT_STATUS` | finish is already in flight for another verb          |

use crate::completion::Tag;
use crate::rpc::state::{Admission, Recovery, RpcState, VerbKind};
use crate::rpc::{ClientCall, Slot, Status, StatusCode, WriteOptions};
use crate::runtime::ExecutionContext;
use crate::step::{Arm, Canceller, Flow, Stage, Step};

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::{debug, warn};

const PRIMARY: Stage = Stage::INITIAL;
const WRITES_DONE: Stage = Stage(1);
const FINISH: Stage = Stage(2);
const AUTO_FINISH: Stage = Stage(3);
const AWAIT_STATUS: Stage = Stage(4);

pub(crate) enum Verb<Request> {
    Start,
    ReadInitialMetadata,
    Read,
    Write {
        request: Option<Request>,
        options: WriteOptions,
    },
    WritesDone,
    Finish,
}

impl<Request> Verb<Request> {
    fn kind(&self) -> VerbKind {
        match self {
            Verb::Start => VerbKind::Start,
            Verb::ReadInitialMetadata => VerbKind::ReadInitialMetadata,
            Verb::Read => VerbKind::Read,
            Verb::Write { options, .. } => VerbKind::Write {
                last_message: options.is_last_message(),
            },
            Verb::WritesDone => VerbKind::WritesDone,
            Verb::Finish => VerbKind::Finish,
        }
    }
}

#[derive(Debug)]
pub(crate) enum VerbOutput<Response> {
    Ok(bool),
    Message(Option<Response>),
    Status(Status),
}

impl<Response> VerbOutput<Response> {
    pub(crate) fn into_ok(self) -> bool {
        match self {
            VerbOutput::Ok(ok) => ok,
            VerbOutput::Message(message) => message.is_some(),
            VerbOutput::Status(status) => status.is_ok(),
        }
    }

    pub(crate) fn into_message(self) -> Option<Response> {
        match self {
            VerbOutput::Message(message) => message,
            _ => None,
        }
    }

    pub(crate) fn into_status(self) -> Status {
        match self {
            VerbOutput::Status(status) => status,
            VerbOutput::Ok(_) | VerbOutput::Message(_) => {
                Status::unknown("verb did not produce a status")
            }
        }
    }
}

/// State shared by every verb of one call.
pub(crate) struct RpcInner<C> {
    pub(crate) call: C,
    pub(crate) state: Cell<RpcState>,
    pub(crate) status: RefCell<Option<Status>>,
    status_slot: Slot<Status>,
    waiters: RefCell<Vec<Tag>>,
}

impl<C: ClientCall> RpcInner<C> {
    pub(crate) fn new(call: C) -> Self {
        Self {
            call,
            state: Cell::new(RpcState::NotStarted),
            status: RefCell::new(None),
            status_slot: Slot::new(),
            waiters: RefCell::new(Vec::new()),
        }
    }

    fn initiate_finish(&self, arm: &mut Arm<'_>, stage: Stage) {
        self.state.set(RpcState::Finished);
        self.call.finish(self.status_slot.clone(), arm.tag(stage));
    }

    // Stores the status delivered by finish and releases every verb waiting for it.
    fn record_status(&self, context: &ExecutionContext) -> Status {
        let status = self
            .status_slot
            .take()
            .unwrap_or_else(|| Status::unknown("finish completed without a status"));
        *self.status.borrow_mut() = Some(status.clone());

        let waiters = self.waiters.take();
        if !waiters.is_empty() {
            debug!(waiters = waiters.len(), "releasing verbs waiting for status");
        }
        for tag in waiters {
            context.completion_queue().post(tag);
        }

        status
    }

    fn await_status<R>(&self, arm: &mut Arm<'_>) -> Flow<VerbOutput<R>> {
        if let Some(status) = self.status.borrow().clone() {
            return Flow::Complete(VerbOutput::Status(status));
        }

        let tag = arm.tag(AWAIT_STATUS);
        self.waiters.borrow_mut().push(tag);
        Flow::Pending
    }
}

pub(crate) struct VerbStep<C: ClientCall> {
    rpc: Rc<RpcInner<C>>,
    verb: Verb<C::Request>,
    response: Slot<C::Response>,
}

impl<C: ClientCall> VerbStep<C> {
    pub(crate) fn new(rpc: Rc<RpcInner<C>>, verb: Verb<C::Request>) -> Self {
        Self {
            rpc,
            verb,
            response: Slot::new(),
        }
    }

    fn issue(&mut self, arm: &mut Arm<'_>) -> Flow<VerbOutput<C::Response>> {
        let call = &self.rpc.call;

        match &mut self.verb {
            Verb::Start => call.start_call(arm.tag(PRIMARY)),
            Verb::ReadInitialMetadata => call.read_initial_metadata(arm.tag(PRIMARY)),
            Verb::Read => call.read(self.response.clone(), arm.tag(PRIMARY)),
            Verb::Write { request, options } => {
                let Some(request) = request.take() else {
                    return Flow::Complete(VerbOutput::Ok(false));
                };
                call.write(request, *options, arm.tag(PRIMARY));
            }
            Verb::WritesDone => call.writes_done(arm.tag(PRIMARY)),
            Verb::Finish => self.rpc.initiate_finish(arm, FINISH),
        }

        Flow::Pending
    }

    fn success(&self) -> VerbOutput<C::Response> {
        match self.verb {
            Verb::Read => VerbOutput::Message(self.response.take()),
            _ => VerbOutput::Ok(true),
        }
    }

    fn failure(&self) -> VerbOutput<C::Response> {
        match self.verb {
            Verb::Read => VerbOutput::Message(None),
            _ => VerbOutput::Ok(false),
        }
    }

    fn rejected(&self) -> VerbOutput<C::Response> {
        match self.verb {
            Verb::Finish => VerbOutput::Status(Status::new(
                StatusCode::FailedPrecondition,
                "finish requested on a call that was never started",
            )),
            _ => self.failure(),
        }
    }
}

impl<C> Step for VerbStep<C>
where
    C: ClientCall + 'static,
{
    type Output = VerbOutput<C::Response>;

    fn initiate(&mut self, arm: &mut Arm<'_>) -> Flow<Self::Output> {
        let state = self.rpc.state.get();
        let kind = self.verb.kind();

        match state.admit(kind) {
            Admission::Issue { next } => {
                self.rpc.state.set(next);
                self.issue(arm)
            }
            Admission::WritesDoneThenFinish => {
                self.rpc.state.set(RpcState::WritesDoneIssued);
                self.rpc.call.writes_done(arm.tag(WRITES_DONE));
                Flow::Pending
            }
            Admission::AlreadyDone => Flow::Complete(VerbOutput::Ok(true)),
            Admission::Finished => self.rpc.await_status(arm),
            Admission::Rejected => {
                warn!(?state, verb = ?kind, "verb not valid in the current call state");
                Flow::Complete(self.rejected())
            }
        }
    }

    fn done(&mut self, stage: Stage, ok: bool, arm: &mut Arm<'_>) -> Flow<Self::Output> {
        match stage {
            PRIMARY if ok => Flow::Complete(self.success()),
            PRIMARY => match self.rpc.state.get().on_failure() {
                Recovery::FinishCall => {
                    debug!(verb = ?self.verb.kind(), "operation failed, finishing call");
                    self.rpc.initiate_finish(arm, AUTO_FINISH);
                    Flow::Pending
                }
                Recovery::AlreadyFinishing => Flow::Complete(self.failure()),
            },
            WRITES_DONE if self.rpc.state.get() == RpcState::Finished => {
                self.rpc.await_status(arm)
            }
            WRITES_DONE => {
                self.rpc.initiate_finish(arm, FINISH);
                Flow::Pending
            }
            AUTO_FINISH => {
                self.rpc.record_status(arm.context());
                Flow::Complete(self.failure())
            }
            FINISH => Flow::Complete(VerbOutput::Status(self.rpc.record_status(arm.context()))),
            _ => {
                let status = self.rpc.status.borrow().clone();
                Flow::Complete(VerbOutput::Status(status.unwrap_or_else(|| {
                    Status::unknown("call finished without a status")
                })))
            }
        }
    }

    fn canceller(&self) -> Option<Canceller> {
        let rpc = self.rpc.clone();
        Some(Canceller::new(move || rpc.call.try_cancel()))
    }
}
