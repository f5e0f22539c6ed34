//! Transport-facing interfaces.
//!
//! The RPC wrappers never talk to a network. They drive an implementation of
//! [`ClientCall`] (streaming) or [`UnaryCall`], which starts the underlying I/O and
//! later reports each operation through the context's completion queue under the tag
//! it was given. Results the transport produces are written into shared [`Slot`]s
//! before the tag is delivered.

use crate::completion::Tag;
use crate::rpc::Status;

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Shared single-value cell a transport fills before delivering a completion.
///
/// Backed by a `parking_lot` mutex, so transports completing from other threads can
/// write into it.
pub struct Slot<T>(Arc<Mutex<Option<T>>>);

impl<T> Slot<T> {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }

    /// Stores `value`, replacing any previous one.
    pub fn set(&self, value: T) {
        *self.0.lock() = Some(value);
    }

    pub fn take(&self) -> Option<T> {
        self.0.lock().take()
    }

    pub fn is_filled(&self) -> bool {
        self.0.lock().is_some()
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("filled", &self.is_filled())
            .finish()
    }
}

/// Per-write flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteOptions {
    last_message: bool,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the write as the last one; it implies writes-done.
    pub fn set_last_message(mut self) -> Self {
        self.last_message = true;
        self
    }

    pub fn is_last_message(&self) -> bool {
        self.last_message
    }
}

/// Streaming client call, as exposed by a transport.
///
/// Every method starts one operation and must eventually deliver `tag` exactly once
/// through the completion queue, with `ok == false` when the operation failed or the
/// call is going away.
pub trait ClientCall {
    type Request: 'static;
    type Response: 'static;

    fn start_call(&self, tag: Tag);

    fn read_initial_metadata(&self, tag: Tag);

    /// Reads one message into `response`.
    fn read(&self, response: Slot<Self::Response>, tag: Tag);

    fn write(&self, request: Self::Request, options: WriteOptions, tag: Tag);

    fn writes_done(&self, tag: Tag);

    /// Receives the final status into `status`. Always delivered with `ok == true`.
    fn finish(&self, status: Slot<Status>, tag: Tag);

    /// Best-effort cancellation; pending operations complete with `ok == false`.
    fn try_cancel(&self);
}

/// Unary client call: start, send the request and finish under one tag.
pub trait UnaryCall {
    type Request: 'static;
    type Response: 'static;

    fn call(
        &self,
        request: Self::Request,
        response: Slot<Self::Response>,
        status: Slot<Status>,
        tag: Tag,
    );

    fn try_cancel(&self);
}
