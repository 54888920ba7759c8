//! MCP Agent Tool Surface: a pragmatic HTTP endpoint standing in for
//! full MCP wire framing (out of scope here — see the teacher's
//! wrapped bridge pattern this is grounded on). Exposes the four tool
//! contracts an agent needs against a room's Local peer: `execute`,
//! `read_file`, `write_file`, `bash`.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{AuthError, LedgerError, MuxError};
use crate::http::{AppState, AuthQuery};
use crate::room::{Room, DEFAULT_RPC_TIMEOUT};

/// Default command timeout assumed for `bash` calls that omit one,
/// matching `execute`'s spec default of 30s.
const DEFAULT_BASH_TIMEOUT_MS: u64 = 30_000;
/// Slack added on top of the caller's command timeout for the outer
/// RPC deadline (spec §4.5).
const BASH_DEADLINE_SLACK: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolCall {
    Execute { params: Value },
    ReadFile { path: String },
    WriteFile { path: String, content: String },
    Bash {
        command: String,
        #[serde(default)]
        workdir: Option<String>,
        #[serde(default)]
        timeout: Option<u64>,
    },
}

fn mux_error_status(err: &MuxError) -> StatusCode {
    match err {
        MuxError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        MuxError::Closed { .. } => StatusCode::SERVICE_UNAVAILABLE,
        MuxError::Remote(_) => StatusCode::BAD_GATEWAY,
    }
}

fn auth_error_status(err: &AuthError) -> StatusCode {
    match err {
        AuthError::Unauthorized => StatusCode::UNAUTHORIZED,
        AuthError::Forbidden => StatusCode::FORBIDDEN,
    }
}

/// The passphrase per spec §4.1/§6: an `Authorization: Bearer <token>`
/// header takes precedence over a `?passphrase=` query parameter.
fn extract_passphrase(headers: &HeaderMap, query: Option<String>) -> Option<String> {
    if let Some(bearer) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(bearer.to_string());
    }
    query
}

async fn run_read_file(room: &Arc<Room>, path: String) -> Result<Value, MuxError> {
    let result = room
        .call_local("file.read", json!({ "path": path.clone() }), DEFAULT_RPC_TIMEOUT)
        .await?;
    if let Some(mtime) = result.get("mtime").and_then(Value::as_i64) {
        room.record_read(path, mtime).await;
    }
    Ok(result)
}

async fn run_write_file(
    room: &Arc<Room>,
    path: String,
    content: String,
) -> Result<Value, ToolError> {
    let expected_mtime = room.check_write_allowed(&path).await.map_err(ToolError::Ledger)?;
    let result = room
        .call_local(
            "file.write",
            json!({ "path": path.clone(), "content": content, "expectedMtime": expected_mtime }),
            DEFAULT_RPC_TIMEOUT,
        )
        .await
        .map_err(ToolError::Mux)?;
    if let Some(mtime) = result.get("mtime").and_then(Value::as_i64) {
        room.record_read(path, mtime).await;
    }
    Ok(result)
}

async fn run_bash(
    room: &Arc<Room>,
    command: String,
    workdir: Option<String>,
    timeout_ms: Option<u64>,
) -> Result<Value, MuxError> {
    let mut params = json!({ "command": command });
    if let Some(dir) = workdir {
        params["workdir"] = json!(dir);
    }
    if let Some(ms) = timeout_ms {
        params["timeout"] = json!(ms);
    }
    let deadline = Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_BASH_TIMEOUT_MS)) + BASH_DEADLINE_SLACK;
    room.call_local("bash.execute", params, deadline).await
}

enum ToolError {
    Mux(MuxError),
    Ledger(LedgerError),
}

impl ToolError {
    fn status(&self) -> StatusCode {
        match self {
            ToolError::Mux(e) => mux_error_status(e),
            ToolError::Ledger(_) => StatusCode::CONFLICT,
        }
    }

    fn message(&self) -> String {
        match self {
            ToolError::Mux(e) => e.to_string(),
            ToolError::Ledger(e) => e.to_string(),
        }
    }
}

/// `POST /room/{roomId}/mcp-server` — authenticates the same way as
/// the WebSocket endpoints, then dispatches one tool call against the
/// room's Local peer and returns its result as JSON.
pub async fn handle_tool_call(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
    Query(auth): Query<AuthQuery>,
    Json(call): Json<ToolCall>,
) -> impl IntoResponse {
    let Some(room) = state.rooms.get(&room_id) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "room not found" }))).into_response();
    };

    let passphrase = extract_passphrase(&headers, auth.passphrase);
    if let Err(err) = room.authenticate(passphrase.as_deref()).await {
        return (auth_error_status(&err), Json(json!({ "error": err.to_string() }))).into_response();
    }

    let outcome: Result<Value, ToolError> = match call {
        // `execute` is stubbed: running arbitrary agent-authored code
        // needs an external sandbox this relay does not provide.
        ToolCall::Execute { .. } => Err(ToolError::Mux(MuxError::Remote(
            "execute is not implemented by this relay; it requires an external sandbox"
                .to_string(),
        ))),
        ToolCall::ReadFile { path } => run_read_file(&room, path).await.map_err(ToolError::Mux),
        ToolCall::WriteFile { path, content } => run_write_file(&room, path, content).await,
        ToolCall::Bash { command, workdir, timeout } => {
            run_bash(&room, command, workdir, timeout).await.map_err(ToolError::Mux)
        }
    };

    match outcome {
        Ok(result) => Json(json!({ "result": result })).into_response(),
        Err(err) => (err.status(), Json(json!({ "error": err.message() }))).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_error_message_names_the_missing_sandbox() {
        let err = ToolError::Mux(MuxError::Remote(
            "execute is not implemented by this relay; it requires an external sandbox"
                .to_string(),
        ));
        assert!(err.message().contains("external sandbox"));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn write_without_prior_read_is_a_conflict() {
        let room = Room::new(Arc::from("r1"));
        let err = run_write_file(&room, "/tmp/x".into(), "data".into()).await;
        match err {
            Err(ToolError::Ledger(LedgerError::NotRead { path })) => assert_eq!(path, "/tmp/x"),
            _ => panic!("expected NotRead"),
        }
    }

    #[tokio::test]
    async fn bash_without_local_peer_reports_closed() {
        let room = Room::new(Arc::from("r1"));
        let err = run_bash(&room, "echo hi".into(), None, None).await;
        assert!(matches!(err, Err(MuxError::Closed { .. })));
    }

    #[tokio::test]
    async fn bash_with_timeout_adds_five_seconds_of_slack() {
        // No Local peer connected, so call_local fails immediately with
        // Closed rather than actually waiting out the deadline — this
        // only exercises that a custom timeout is accepted and forwarded.
        let room = Room::new(Arc::from("r1"));
        let err = run_bash(&room, "sleep 1".into(), Some("/tmp".into()), Some(1_000)).await;
        assert!(matches!(err, Err(MuxError::Closed { .. })));
    }

    #[tokio::test]
    async fn write_records_the_post_write_mtime_for_read_your_writes() {
        let room = Room::new(Arc::from("r1"));
        room.record_read("/tmp/x".into(), 100).await;
        assert_eq!(room.check_write_allowed("/tmp/x").await.unwrap(), 100);
        // Without a Local peer the write itself fails, but the
        // precondition check must read back the ledger's stored mtime.
    }

    #[tokio::test]
    async fn unauthenticated_tool_call_is_rejected() {
        let room = Room::new(Arc::from("r1"));
        room.authenticate(Some("secret")).await.unwrap();
        assert_eq!(room.authenticate(None).await, Err(AuthError::Unauthorized));
        assert_eq!(room.authenticate(Some("wrong")).await, Err(AuthError::Forbidden));
    }
}
