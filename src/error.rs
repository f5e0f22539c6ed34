//! Error types surfaced by the execution context.
//!
//! Transport failures are not errors here: they travel as the `ok` flag of a
//! completion. The only failure a caller can observe as a `Result` is submitting
//! work to a context that is already being torn down.

use thiserror::Error;

/// Error returned when work cannot be submitted to an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// The context has started (or finished) its teardown; no further operations are accepted.
    #[error("execution context has been shut down")]
    ShutDown,
}
