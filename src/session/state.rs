//! Session handle lifecycle
//!
//! A handle is born `Live` and moves to `Closed` exactly once:
//!
//! ```text
//! ┌──────────┐  close() / remote drop  ┌──────────┐
//! │   Live   │ ──────────────────────► │  Closed  │
//! └──────────┘                         └──────────┘
//! ```
//!
//! The first close wins and records why; later closes are no-ops.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleState {
    #[default]
    Live,
    Closed,
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Why a handle left the `Live` state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// `close` / `close_shell` / `close_all`
    Requested,
    /// Transport reported the link gone
    RemoteDisconnect,
    /// Shell output stream finished
    ShellExited,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "requested"),
            Self::RemoteDisconnect => write!(f, "remote disconnect"),
            Self::ShellExited => write!(f, "shell exited"),
        }
    }
}

#[derive(Debug)]
pub struct HandleLifecycle {
    state: HandleState,
    reason: Option<CloseReason>,
    state_changed_at: Instant,
}

impl Default for HandleLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleLifecycle {
    pub fn new() -> Self {
        Self {
            state: HandleState::Live,
            reason: None,
            state_changed_at: Instant::now(),
        }
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.reason
    }

    pub fn time_in_state(&self) -> std::time::Duration {
        self.state_changed_at.elapsed()
    }

    pub fn is_live(&self) -> bool {
        self.state == HandleState::Live
    }

    /// Move to `Closed`; returns `false` if already closed
    pub fn close(&mut self, reason: CloseReason) -> bool {
        if self.state == HandleState::Closed {
            return false;
        }
        tracing::debug!(
            "Handle state transition: {} -> {} ({}) after {:?}",
            self.state,
            HandleState::Closed,
            reason,
            self.time_in_state()
        );
        self.state = HandleState::Closed;
        self.reason = Some(reason);
        self.state_changed_at = Instant::now();
        true
    }
}
