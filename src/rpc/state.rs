//! Lifecycle of a streaming client call.
//!
//! Every verb is admitted against the current state before anything is handed to the
//! transport, and every failed primary operation consults [`RpcState::on_failure`] to
//! decide whether the call still has to be driven to finish. Both functions are total.

/// Lifecycle state of a streaming call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RpcState {
    #[default]
    NotStarted,
    Started,
    /// No more writes will be issued.
    WritesDoneIssued,
    /// Finish was issued, explicitly or automatically after a failure.
    Finished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum VerbKind {
    Start,
    ReadInitialMetadata,
    Read,
    Write { last_message: bool },
    WritesDone,
    Finish,
}

/// What to do with a verb requested in a given state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Hand the verb to the transport and move to `next`.
    Issue { next: RpcState },
    /// Finish requested before writes-done: issue writes-done, then finish.
    WritesDoneThenFinish,
    /// Writes-done was already issued; report success without a new operation.
    AlreadyDone,
    /// Finish was already issued; wait for its status.
    Finished,
    /// The verb is not valid in this state.
    Rejected,
}

/// What a failed primary operation implies for the call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Recovery {
    FinishCall,
    AlreadyFinishing,
}

impl RpcState {
    pub(crate) fn admit(self, verb: VerbKind) -> Admission {
        use RpcState::*;

        match (self, verb) {
            (NotStarted, VerbKind::Start) => Admission::Issue { next: Started },
            (NotStarted, _) | (_, VerbKind::Start) => Admission::Rejected,

            (Started, VerbKind::Write { last_message: true }) | (Started, VerbKind::WritesDone) => {
                Admission::Issue {
                    next: WritesDoneIssued,
                }
            }
            (Started, VerbKind::Finish) => Admission::WritesDoneThenFinish,
            (Started, _) => Admission::Issue { next: Started },

            (WritesDoneIssued, VerbKind::Write { .. }) => Admission::Rejected,
            (WritesDoneIssued, VerbKind::WritesDone) => Admission::AlreadyDone,
            (WritesDoneIssued, VerbKind::Finish) => Admission::Issue { next: Finished },
            (WritesDoneIssued, _) => Admission::Issue {
                next: WritesDoneIssued,
            },

            (Finished, VerbKind::Finish) => Admission::Finished,
            (Finished, _) => Admission::Rejected,
        }
    }

    pub(crate) fn on_failure(self) -> Recovery {
        match self {
            RpcState::Finished => Recovery::AlreadyFinishing,
            _ => Recovery::FinishCall,
        }
    }
}
