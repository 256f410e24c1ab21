//! ssm: remote host manager core
//!
//! Authenticates to hosts, runs one-off commands, browses and edits remote
//! files over SFTP, streams interactive shells and polls host telemetry.
//!
//! The interesting part is the session layer: [`session::SessionRegistry`]
//! hands out at most one exec / file-transfer session per connection and any
//! number of terminal-keyed shells, serializes their creation, tracks their
//! liveness and tears them down when a connection is closed or deleted.

pub mod app;
pub mod commands;
pub mod config;
pub mod ipc;
pub mod logging;
pub mod metrics;
pub mod session;
pub mod sftp;
pub mod ssh;

#[cfg(test)]
pub(crate) mod testing;

pub use app::AppState;
