//! Session teardown commands

use serde::Serialize;

use crate::app::AppState;
use crate::session::{SessionKey, SessionKind};

/// Close the connection's sessions of `kind`, or all of them
pub async fn close_session(state: &AppState, connection_id: &str, kind: Option<SessionKind>) -> usize {
    state.registry.close(connection_id, kind).await
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub connection_id: String,
    pub kind: SessionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_id: Option<String>,
}

impl From<SessionKey> for SessionInfo {
    fn from(key: SessionKey) -> Self {
        Self {
            connection_id: key.connection_id,
            kind: key.kind,
            terminal_id: key.terminal_id,
        }
    }
}

/// Live sessions, for diagnostics
pub fn list_sessions(state: &AppState) -> Vec<SessionInfo> {
    state
        .registry
        .live_keys()
        .into_iter()
        .map(SessionInfo::from)
        .collect()
}
