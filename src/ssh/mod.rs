//! SSH transport
//!
//! - `auth`: profile → [`AuthDescriptor`] resolution
//! - `transport`: the [`Connector`] / [`RemoteSession`] seam
//! - `client`: russh implementation of that seam
//! - `shell`: PTY input/output types

pub mod auth;
pub mod client;
pub mod error;
pub mod shell;
pub mod transport;

pub use auth::{expand_home, AuthDescriptor, Credential, CredentialResolver};
pub use client::RusshConnector;
pub use error::SshError;
pub use shell::{PtySize, ShellChannel, ShellEvent, ShellInput, ShellWriter};
pub use transport::{wait_closed, Connector, ExecOutput, RemoteSession};
