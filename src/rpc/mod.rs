//! High-level client RPC on top of the step protocol.
//!
//! - [`Rpc`]: streaming call wrapper with lifecycle tracking and automatic finish
//! - [`request`] / [`UnaryRequest`]: unary call as a single step
//! - [`ClientCall`] / [`UnaryCall`]: what a transport has to provide
//! - [`Status`]: final outcome of a call

mod call;
mod state;
mod status;
mod transport;
mod unary;
mod verb;

pub use call::Rpc;
pub use state::RpcState;
pub use status::{Status, StatusCode};
pub use transport::{ClientCall, Slot, UnaryCall, WriteOptions};
pub use unary::{UnaryRequest, request};
