//! Command Router (C6): classifies an agent protocol command as
//! locally-answered, locally-synthesized-plus-forwarded, or
//! pure-forward (spec §4.3 decision table).

use serde_json::{json, Value};

use crate::targets::{Target, TargetRegistry};
use crate::wire::AgentCommand;

/// Name identifying the relay in `Browser.getVersion`'s user-agent
/// field — not a real browser, but agents expect the shape.
const RELAY_USER_AGENT: &str = "RoomRelay/1.0 WebSocket-Bridge";

/// What the Room should do with an agent's command after routing.
pub enum RouterDecision {
    /// Answer locally; no message is forwarded to the browser.
    /// `synthesized` events are delivered before the reply.
    Local {
        synthesized: Vec<(String, Value, Option<String>)>,
        result: Value,
    },
    /// Answer locally with an error; no message is forwarded.
    LocalError {
        synthesized: Vec<(String, Value, Option<String>)>,
        message: String,
    },
    /// Forward the command to the browser peer verbatim via C3.
    Forward,
}

fn browser_version_descriptor() -> Value {
    json!({
        "protocolVersion": "1.3",
        "product": "Chrome/Cloudflare-Relay",
        "revision": "1.0.0",
        "userAgent": RELAY_USER_AGENT,
        "jsVersion": "V8",
    })
}

fn attached_event(t: &Target) -> (String, Value, Option<String>) {
    (
        "Target.attachedToTarget".to_string(),
        json!({
            "sessionId": t.session_id,
            "targetInfo": t.info_with_attached(true),
            "waitingForDebugger": false,
        }),
        None,
    )
}

fn target_created_event(t: &Target) -> (String, Value, Option<String>) {
    (
        "Target.targetCreated".to_string(),
        json!({ "targetInfo": t.info_with_attached(true) }),
        None,
    )
}

fn param_str<'a>(params: &'a Option<Value>, key: &str) -> Option<&'a str> {
    params.as_ref()?.get(key)?.as_str()
}

fn param_bool(params: &Option<Value>, key: &str) -> Option<bool> {
    params.as_ref()?.get(key)?.as_bool()
}

/// Classify `cmd` against the current target registry. Does not mutate
/// anything — the Room applies `synthesized` events and dispatches
/// `Forward` decisions itself.
pub fn classify(cmd: &AgentCommand, targets: &TargetRegistry) -> RouterDecision {
    match cmd.method.as_str() {
        "Browser.getVersion" => RouterDecision::Local {
            synthesized: vec![],
            result: browser_version_descriptor(),
        },
        "Browser.setDownloadBehavior" => RouterDecision::Local {
            synthesized: vec![],
            result: json!({}),
        },
        "Target.setAutoAttach" => {
            if cmd.session_id.is_some() {
                // Child-session behavior defers to the browser.
                RouterDecision::Forward
            } else {
                let synthesized = targets.all().map(attached_event).collect();
                RouterDecision::Local {
                    synthesized,
                    result: json!({}),
                }
            }
        }
        "Target.setDiscoverTargets" => {
            if param_bool(&cmd.params, "discover").unwrap_or(false) {
                let synthesized = targets.all().map(target_created_event).collect();
                RouterDecision::Local {
                    synthesized,
                    result: json!({}),
                }
            } else {
                RouterDecision::Local {
                    synthesized: vec![],
                    result: json!({}),
                }
            }
        }
        "Target.attachToTarget" => {
            let target_id = param_str(&cmd.params, "targetId");
            match target_id.and_then(|id| targets.get_by_target_id(id)) {
                Some(t) => RouterDecision::Local {
                    synthesized: vec![attached_event(t)],
                    result: json!({ "sessionId": t.session_id }),
                },
                None => RouterDecision::LocalError {
                    synthesized: vec![],
                    message: crate::error::RouterError::TargetNotFound(
                        target_id.unwrap_or_default().to_string(),
                    )
                    .to_string(),
                },
            }
        }
        "Target.getTargetInfo" => {
            let target_id = param_str(&cmd.params, "targetId");
            let session_id = param_str(&cmd.params, "sessionId").or(cmd.session_id.as_deref());
            let found = target_id
                .and_then(|id| targets.get_by_target_id(id))
                .or_else(|| session_id.and_then(|sid| targets.get_by_session(sid)))
                // Legacy fallback (spec §9 open question): resolved as
                // specified rather than treated as an error.
                .or_else(|| targets.first());
            match found {
                Some(t) => RouterDecision::Local {
                    synthesized: vec![],
                    result: json!({ "targetInfo": t.info_with_attached(true) }),
                },
                None => RouterDecision::LocalError {
                    synthesized: vec![],
                    message: "No targets connected".to_string(),
                },
            }
        }
        "Target.getTargets" => {
            let infos: Vec<Value> = targets.all().map(|t| t.info_with_attached(true)).collect();
            RouterDecision::Local {
                synthesized: vec![],
                result: json!({ "targetInfos": infos }),
            }
        }
        "Target.detachFromTarget" => {
            let session_id = param_str(&cmd.params, "sessionId").or(cmd.session_id.as_deref());
            match session_id.and_then(|sid| targets.get_by_session(sid)) {
                Some(_) => RouterDecision::Forward,
                None => RouterDecision::Local {
                    synthesized: vec![],
                    result: json!({}),
                },
            }
        }
        _ => RouterDecision::Forward,
    }
}
