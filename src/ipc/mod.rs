//! Front-end link
//!
//! JSON-RPC over stdin/stdout: requests are routed to [`crate::commands`],
//! shell output and metrics snapshots are pushed back as notifications.

pub mod protocol;
pub mod server;

pub use protocol::{Notification, Request, Response, RpcError};
pub use server::{serve, Dispatcher};
