//! Session management
//!
//! [`SessionRegistry`] owns every exec, file-transfer and shell session and is
//! the only place sessions are opened or closed.

pub mod error;
pub mod registry;
pub mod state;

pub use error::SessionError;
pub use registry::{SessionHandle, SessionKey, SessionKind, SessionRegistry, SessionRequest};
pub use state::{CloseReason, HandleLifecycle, HandleState};
