//! High-level streaming client call.

use crate::rpc::state::RpcState;
use crate::rpc::verb::{RpcInner, Verb, VerbStep};
use crate::rpc::{ClientCall, Status, WriteOptions};
use crate::runtime::ExecutionContext;
use crate::step::{StepHandle, submit};

use std::fmt;
use std::rc::Rc;

/// Streaming client call wrapper that tracks the call's lifecycle.
///
/// Each verb submits a step on the given context and reports its result to a callback
/// invoked from the run loop. Failed operations drive the call to finish on their own,
/// so [`finish`](Rpc::finish) after a failure returns the already received status
/// without asking the transport again.
///
/// # Example
/// ```ignore
/// let rpc = Rpc::new(call);
/// rpc.start(&ctx, {
///     let rpc = rpc.clone();
///     move |ctx, ok| {
///         if ok {
///             rpc.write(ctx, request, WriteOptions::new().set_last_message(), |_, _| {});
///         }
///     }
/// });
/// ctx.run();
/// ```
pub struct Rpc<C: ClientCall> {
    inner: Rc<RpcInner<C>>,
}

impl<C: ClientCall> Clone for Rpc<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C> Rpc<C>
where
    C: ClientCall + 'static,
{
    pub fn new(call: C) -> Self {
        Self {
            inner: Rc::new(RpcInner::new(call)),
        }
    }

    pub fn state(&self) -> RpcState {
        self.inner.state.get()
    }

    /// Final status, once finish completed.
    pub fn status(&self) -> Option<Status> {
        self.inner.status.borrow().clone()
    }

    /// Returns `true` if the call finished with an OK status.
    pub fn ok(&self) -> bool {
        self.inner
            .status
            .borrow()
            .as_ref()
            .is_some_and(Status::is_ok)
    }

    /// The underlying transport call.
    pub fn call(&self) -> &C {
        &self.inner.call
    }

    /// Requests cancellation of the call. In-flight verbs complete with a failure.
    pub fn cancel(&self) {
        self.inner.call.try_cancel();
    }

    /// Starts the call. `on_done` receives `false` if the call could not be started, in
    /// which case it was finished automatically.
    pub fn start<F>(&self, context: &ExecutionContext, on_done: F) -> StepHandle
    where
        F: FnOnce(&ExecutionContext, bool) + 'static,
    {
        self.submit_verb(context, Verb::Start, move |context, output| {
            on_done(context, output.into_ok())
        })
    }

    pub fn read_initial_metadata<F>(&self, context: &ExecutionContext, on_done: F) -> StepHandle
    where
        F: FnOnce(&ExecutionContext, bool) + 'static,
    {
        self.submit_verb(context, Verb::ReadInitialMetadata, move |context, output| {
            on_done(context, output.into_ok())
        })
    }

    /// Reads the next message. `None` means the stream ended or failed.
    pub fn read<F>(&self, context: &ExecutionContext, on_done: F) -> StepHandle
    where
        F: FnOnce(&ExecutionContext, Option<C::Response>) + 'static,
    {
        self.submit_verb(context, Verb::Read, move |context, output| {
            on_done(context, output.into_message())
        })
    }

    /// Writes `request`. A write marked as last message also issues writes-done.
    pub fn write<F>(
        &self,
        context: &ExecutionContext,
        request: C::Request,
        options: WriteOptions,
        on_done: F,
    ) -> StepHandle
    where
        F: FnOnce(&ExecutionContext, bool) + 'static,
    {
        let verb = Verb::Write {
            request: Some(request),
            options,
        };

        self.submit_verb(context, verb, move |context, output| {
            on_done(context, output.into_ok())
        })
    }

    pub fn writes_done<F>(&self, context: &ExecutionContext, on_done: F) -> StepHandle
    where
        F: FnOnce(&ExecutionContext, bool) + 'static,
    {
        self.submit_verb(context, Verb::WritesDone, move |context, output| {
            on_done(context, output.into_ok())
        })
    }

    /// Finishes the call, issuing writes-done first if needed.
    ///
    /// Finishing a call that is already finishing or finished does not reach the
    /// transport again; `on_done` receives the status of the first finish.
    pub fn finish<F>(&self, context: &ExecutionContext, on_done: F) -> StepHandle
    where
        F: FnOnce(&ExecutionContext, Status) + 'static,
    {
        self.submit_verb(context, Verb::Finish, move |context, output| {
            on_done(context, output.into_status())
        })
    }

    fn submit_verb<F>(
        &self,
        context: &ExecutionContext,
        verb: Verb<C::Request>,
        on_done: F,
    ) -> StepHandle
    where
        F: FnOnce(&ExecutionContext, crate::rpc::verb::VerbOutput<C::Response>) + 'static,
    {
        submit(context, VerbStep::new(self.inner.clone(), verb), on_done)
    }
}

impl<C: ClientCall> fmt::Debug for Rpc<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rpc")
            .field("state", &self.inner.state.get())
            .field("status", &self.inner.status.borrow())
            .finish()
    }
}
