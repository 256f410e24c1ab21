//! JSON-RPC protocol types for the ssm front-end link.
//!
//! Wire format: line-delimited JSON over stdin/stdout.
//! - Requests have `id` + `method` + optional `params`
//! - Responses have `id` + `result` or `error`
//! - Notifications have `method` + `params` but NO `id`

use serde::{Deserialize, Deserializer, Serialize};

use crate::config::{ProfileDraft, ProfileUpdate};
use crate::metrics::MetricsUpdate;
use crate::session::SessionKind;
use crate::sftp::ContentEncoding;
use crate::ssh::PtySize;

// ═══════════════════════════════════════════════════════════════════════════
// JSON-RPC envelope
// ═══════════════════════════════════════════════════════════════════════════

/// Incoming request from the front end.
#[derive(Debug, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Outgoing response to the front end.
#[derive(Debug, Serialize)]
pub struct Response {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    /// Structured detail, e.g. exit code and stderr of a failed command
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Server-initiated notification (no `id`).
#[derive(Debug, Serialize)]
pub struct Notification {
    pub method: String,
    pub params: serde_json::Value,
}

impl Response {
    pub fn ok(id: u64, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, error: RpcError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Option<serde_json::Value>) -> Self {
        self.data = data;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Error codes
// ═══════════════════════════════════════════════════════════════════════════

pub const ERR_PARSE: i32 = -32700;
pub const ERR_INVALID_PARAMS: i32 = -32602;
pub const ERR_METHOD_NOT_FOUND: i32 = -32601;
pub const ERR_INTERNAL: i32 = -32603;
/// Dial, channel, transfer or storage failure
pub const ERR_IO: i32 = -1;
pub const ERR_NOT_FOUND: i32 = -2;
pub const ERR_PERMISSION: i32 = -3;
/// Remote command exited non-zero; `data` carries exit code and output
pub const ERR_COMMAND_FAILED: i32 = -4;
pub const ERR_DISCONNECTED: i32 = -5;
/// rmdir on a directory that still has entries
pub const ERR_DIR_NOT_EMPTY: i32 = -6;

// ═══════════════════════════════════════════════════════════════════════════
// Notification methods
// ═══════════════════════════════════════════════════════════════════════════

pub const NOTIFY_METRICS_UPDATE: &str = "metrics/update";
pub const NOTIFY_TERMINAL_DATA: &str = "terminal/data";
pub const NOTIFY_TERMINAL_EXIT: &str = "terminal/exit";

/// metrics/update params
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsNotification {
    pub connection_id: String,
    #[serde(flatten)]
    pub update: MetricsUpdate,
}

/// terminal/data params; `data` is base64 so binary output survives JSON
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalData {
    pub connection_id: String,
    pub terminal_id: String,
    pub data: String,
}

/// terminal/exit params
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalExit {
    pub connection_id: String,
    pub terminal_id: String,
    pub exit_status: Option<u32>,
}

// ═══════════════════════════════════════════════════════════════════════════
// connections/* params
// ═══════════════════════════════════════════════════════════════════════════

/// Any method that only names a connection
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionParams {
    pub connection_id: String,
}

/// connections/add params
#[derive(Debug, Deserialize)]
pub struct AddConnectionParams {
    pub profile: ProfileDraft,
    #[serde(default)]
    pub password: Option<String>,
}

/// connections/update params
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConnectionParams {
    pub connection_id: String,
    pub update: ProfileUpdate,
    #[serde(default)]
    pub password: Option<String>,
}

/// connections/setPassword params
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPasswordParams {
    pub connection_id: String,
    pub password: String,
}

/// connections/test params
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestConnectionParams {
    pub profile: ProfileDraft,
    /// Id of the saved profile being edited, for its stored secret
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════
// snippets/* params
// ═══════════════════════════════════════════════════════════════════════════

/// snippets/remove params
#[derive(Debug, Deserialize)]
pub struct SnippetIdParams {
    pub id: String,
}

// ═══════════════════════════════════════════════════════════════════════════
// ssh/exec + process/* params
// ═══════════════════════════════════════════════════════════════════════════

/// ssh/exec params
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecParams {
    pub connection_id: String,
    pub command: String,
}

/// process/kill params
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillParams {
    pub connection_id: String,
    /// Accepted as string or number; validated before anything is sent
    #[serde(deserialize_with = "pid_as_string")]
    pub pid: String,
}

fn pid_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// sftp/* params
// ═══════════════════════════════════════════════════════════════════════════

/// sftp/list, sftp/delete, sftp/mkdir, sftp/rmdir params
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathParams {
    pub connection_id: String,
    pub path: String,
}

/// sftp/readFile params
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadFileParams {
    pub connection_id: String,
    pub path: String,
    #[serde(default)]
    pub encoding: ContentEncoding,
}

/// sftp/writeFile params
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteFileParams {
    pub connection_id: String,
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub encoding: ContentEncoding,
}

/// sftp/rename params
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameParams {
    pub connection_id: String,
    pub old_path: String,
    pub new_path: String,
}

/// sftp/download and sftp/upload params
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferParams {
    pub connection_id: String,
    pub remote_path: String,
    pub local_path: String,
}

// ═══════════════════════════════════════════════════════════════════════════
// terminal/* + session/* params
// ═══════════════════════════════════════════════════════════════════════════

/// terminal/create params
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalCreateParams {
    pub connection_id: String,
    pub terminal_id: String,
    #[serde(default = "default_rows")]
    pub rows: u32,
    #[serde(default = "default_cols")]
    pub cols: u32,
}

fn default_rows() -> u32 {
    PtySize::default().rows
}

fn default_cols() -> u32 {
    PtySize::default().cols
}

/// terminal/write params
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalWriteParams {
    pub connection_id: String,
    pub terminal_id: String,
    pub data: String,
    #[serde(default)]
    pub encoding: ContentEncoding,
}

/// terminal/resize params
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalResizeParams {
    pub connection_id: String,
    pub terminal_id: String,
    pub rows: u32,
    pub cols: u32,
}

/// terminal/stop params
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalParams {
    pub connection_id: String,
    pub terminal_id: String,
}

/// session/close params; all kinds when `kind` is absent
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCloseParams {
    pub connection_id: String,
    #[serde(default)]
    pub kind: Option<SessionKind>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_shape() {
        let ok = serde_json::to_value(Response::ok(7, json!([]))).unwrap();
        assert_eq!(ok, json!({"id": 7, "result": []}));

        let err = Response::err(
            8,
            RpcError::new(ERR_COMMAND_FAILED, "boom").with_data(Some(json!({"exitCode": 2}))),
        );
        assert_eq!(
            serde_json::to_value(err).unwrap(),
            json!({"id": 8, "error": {"code": -4, "message": "boom", "data": {"exitCode": 2}}})
        );
    }

    #[test]
    fn test_pid_accepts_string_or_number() {
        let p: KillParams = serde_json::from_value(json!({"connectionId": "c", "pid": 42})).unwrap();
        assert_eq!(p.pid, "42");
        let p: KillParams =
            serde_json::from_value(json!({"connectionId": "c", "pid": "abc"})).unwrap();
        assert_eq!(p.pid, "abc");
    }

    #[test]
    fn test_metrics_notification_is_flat() {
        let n = MetricsNotification {
            connection_id: "c1".into(),
            update: MetricsUpdate::Error {
                message: "down".into(),
            },
        };
        assert_eq!(
            serde_json::to_value(n).unwrap(),
            json!({"connectionId": "c1", "status": "error", "message": "down"})
        );
    }

    #[test]
    fn test_request_without_params() {
        let req: Request = serde_json::from_str(r#"{"id":1,"method":"connections/list"}"#).unwrap();
        assert!(req.params.is_null());
    }
}
