//! Wire envelopes for the three peer-facing protocols.
//!
//! Every message is a JSON object (spec §6). The dynamic message union
//! is discriminated by presence of `id` (reply) vs `method` (request,
//! event or control) rather than relying on serde's untagged guessing,
//! per the "sum types with explicit constructors and a single dispatch
//! switch; reject unknown discriminators" design note.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A protocol command sent by an Agent peer.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentCommand {
    pub id: i64,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
}

/// An error payload embedded in a reply to an Agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentErrorPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
}

impl AgentErrorPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }
}

/// A reply sent back to the Agent that issued a command.
#[derive(Debug, Clone, Serialize)]
pub struct AgentReply {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AgentErrorPayload>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl AgentReply {
    pub fn ok(id: i64, result: Value, session_id: Option<String>) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
            session_id,
        }
    }

    pub fn err(id: i64, message: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(AgentErrorPayload::new(message)),
            session_id,
        }
    }
}

/// An event fanned out (or synthesized) to an Agent peer.
#[derive(Debug, Clone, Serialize)]
pub struct AgentEvent {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// A message queued for delivery to an agent socket: either a reply/event
/// as JSON text, or a request to close the socket with a given code/reason.
#[derive(Debug, Clone)]
pub enum Outbound {
    Json(Value),
    Close { code: u16, reason: String },
}

impl Outbound {
    pub fn reply(reply: AgentReply) -> Self {
        Self::Json(serde_json::to_value(reply).expect("AgentReply always serializes"))
    }

    pub fn event(event: AgentEvent) -> Self {
        Self::Json(serde_json::to_value(event).expect("AgentEvent always serializes"))
    }
}

/// The relay->Browser command envelope (spec §6).
#[derive(Debug, Clone, Serialize)]
pub struct ForwardCdpCommand {
    pub id: u64,
    pub method: &'static str,
    pub params: ForwardCdpParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForwardCdpParams {
    pub method: String,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl ForwardCdpCommand {
    pub fn new(id: u64, method: String, session_id: Option<String>, params: Option<Value>) -> Self {
        Self {
            id,
            method: "forwardCDPCommand",
            params: ForwardCdpParams {
                method,
                session_id,
                params,
            },
        }
    }
}

/// A message received from the Browser peer, after discriminating on
/// the presence of `id` (response) vs `method` (event/log/pong).
#[derive(Debug, Clone)]
pub enum BrowserInbound {
    Response {
        id: u64,
        result: Option<Value>,
        error: Option<String>,
    },
    ForwardedEvent {
        method: String,
        session_id: Option<String>,
        params: Option<Value>,
    },
    Log {
        level: String,
        args: Vec<String>,
    },
    Pong,
    Unknown,
}

impl BrowserInbound {
    pub fn parse(raw: &Value) -> Self {
        let obj = match raw.as_object() {
            Some(o) => o,
            None => return Self::Unknown,
        };
        if let Some(id) = obj.get("id").and_then(Value::as_u64) {
            return Self::Response {
                id,
                result: obj.get("result").cloned(),
                error: obj
                    .get("error")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            };
        }
        match obj.get("method").and_then(Value::as_str) {
            Some("forwardCDPEvent") => {
                let params = obj.get("params").cloned().unwrap_or(Value::Null);
                let inner_method = params
                    .get("method")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let session_id = params
                    .get("sessionId")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let inner_params = params.get("params").cloned();
                Self::ForwardedEvent {
                    method: inner_method,
                    session_id,
                    params: inner_params,
                }
            }
            Some("log") => {
                let params = obj.get("params").cloned().unwrap_or(Value::Null);
                let level = params
                    .get("level")
                    .and_then(Value::as_str)
                    .unwrap_or("info")
                    .to_string();
                let args = params
                    .get("args")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .map(|v| v.as_str().unwrap_or_default().to_string())
                            .collect()
                    })
                    .unwrap_or_default();
                Self::Log { level, args }
            }
            Some("pong") => Self::Pong,
            _ => Self::Unknown,
        }
    }
}

/// The relay->Local command envelope (spec §6).
#[derive(Debug, Clone, Serialize)]
pub struct LocalCommand {
    pub id: u64,
    pub method: &'static str,
    pub params: Value,
}

/// A message received from the Local peer.
#[derive(Debug, Clone)]
pub enum LocalInbound {
    Response {
        id: u64,
        result: Option<Value>,
        error: Option<String>,
    },
    Log { level: String, args: Vec<String> },
    Pong,
    Unknown,
}

impl LocalInbound {
    pub fn parse(raw: &Value) -> Self {
        let obj = match raw.as_object() {
            Some(o) => o,
            None => return Self::Unknown,
        };
        if let Some(id) = obj.get("id").and_then(Value::as_u64) {
            return Self::Response {
                id,
                result: obj.get("result").cloned(),
                error: obj
                    .get("error")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            };
        }
        match obj.get("method").and_then(Value::as_str) {
            Some("log") => {
                let params = obj.get("params").cloned().unwrap_or(Value::Null);
                let level = params
                    .get("level")
                    .and_then(Value::as_str)
                    .unwrap_or("info")
                    .to_string();
                let args = params
                    .get("args")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .map(|v| v.as_str().unwrap_or_default().to_string())
                            .collect()
                    })
                    .unwrap_or_default();
                Self::Log { level, args }
            }
            Some("pong") => Self::Pong,
            _ => Self::Unknown,
        }
    }
}

/// Application-level keepalive ping sent to Browser/Local peers.
pub fn ping_message() -> Value {
    serde_json::json!({ "method": "ping" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browser_response_parses() {
        let raw = serde_json::json!({"id": 7, "result": {"ok": true}});
        match BrowserInbound::parse(&raw) {
            BrowserInbound::Response { id, result, error } => {
                assert_eq!(id, 7);
                assert!(error.is_none());
                assert_eq!(result, Some(serde_json::json!({"ok": true})));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn browser_event_unwraps_forward_envelope() {
        let raw = serde_json::json!({
            "method": "forwardCDPEvent",
            "params": {
                "method": "Target.attachedToTarget",
                "sessionId": "s1",
                "params": {"targetInfo": {"targetId": "t1"}}
            }
        });
        match BrowserInbound::parse(&raw) {
            BrowserInbound::ForwardedEvent {
                method,
                session_id,
                params,
            } => {
                assert_eq!(method, "Target.attachedToTarget");
                assert_eq!(session_id.as_deref(), Some("s1"));
                assert!(params.is_some());
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn browser_pong_and_log_are_recognized() {
        assert!(matches!(
            BrowserInbound::parse(&serde_json::json!({"method": "pong"})),
            BrowserInbound::Pong
        ));
        match BrowserInbound::parse(
            &serde_json::json!({"method": "log", "params": {"level": "warn", "args": ["x"]}}),
        ) {
            BrowserInbound::Log { level, args } => {
                assert_eq!(level, "warn");
                assert_eq!(args, vec!["x".to_string()]);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn malformed_message_is_unknown() {
        assert!(matches!(
            BrowserInbound::parse(&serde_json::json!([1, 2, 3])),
            BrowserInbound::Unknown
        ));
    }
}
