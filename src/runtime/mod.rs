//! Execution context subsystem modules.

mod atomic_queue;
pub(crate) mod context;
mod core;
mod handle;
mod notify;
pub(crate) mod operation;
mod pool;
pub(crate) mod queue;

pub(crate) use self::core::Reservation;
pub use self::core::ExecutionContext;
pub use handle::RemoteHandle;
pub use notify::DoneNotifier;
pub use pool::{Allocator, PoolStats};
