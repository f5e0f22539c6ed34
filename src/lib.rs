//! Completion-queue execution context with a tag-driven asynchronous step protocol.
//!
//! This crate provides a single-consumer run loop that multiplexes two event sources:
//! a completion queue delivering `(tag, ok)` notifications for operations started
//! elsewhere, and an in-process queue of deferred callbacks submitted either from the
//! running thread or from any other thread.
//!
//! # Architecture
//!
//! - **ExecutionContext**: Owns the local and remote work queues and drives the run loop
//! - **RemoteHandle**: `Send + Sync` handle for cross-thread submission, stop and work accounting
//! - **CompletionQueue**: The completion-event source the loop polls; [`InProcessQueue`] is the bundled one
//! - **Step**: `initiate(tag) → event → done(ok)` protocol every asynchronous verb is built from
//! - **Rpc**: Per-call state machine layered on steps (start, read, write, writes-done, finish)
//! - **ContextBuilder**: Fluent builder for context configuration
//!
//! # Example
//! ```ignore
//! use completion_engine::ExecutionContext;
//!
//! let ctx = ExecutionContext::new();
//! ctx.post(|_| println!("deferred"));
//! assert!(ctx.run());
//! ```

mod builder;
pub mod completion;
mod error;
pub mod rpc;
mod runtime;
pub mod step;

pub use builder::ContextBuilder;
pub use completion::{CompletionQueue, Deadline, InProcessQueue, QueueEvent, Tag};
pub use error::SubmitError;
pub use rpc::{
    ClientCall, Rpc, RpcState, Slot, Status, StatusCode, UnaryCall, UnaryRequest, WriteOptions,
    request,
};
pub use runtime::{Allocator, DoneNotifier, ExecutionContext, PoolStats, RemoteHandle};
pub use step::{Arm, Canceller, Flow, Stage, Step, StepHandle, Timed, Timer, submit, with_deadline};
