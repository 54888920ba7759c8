//! Room lifecycle and aggregate (C10): owns one room's peer registry,
//! target mirror, read-time ledger and the two RPC multiplexers, and
//! enforces the lifecycle transitions for Browser/Local disconnects.
//!
//! A room has a single logical owner: `RoomState` is mutated only while
//! holding `Room::state`, and that lock is never held across an
//! `.await` that waits on network I/O or an RPC response. Mutations are
//! synchronous; sends to peer channels and RPC waits happen after the
//! lock is dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::Authenticator;
use crate::error::{AdmitError, AuthError, BackendKind, LedgerError, MuxError};
use crate::events::broadcast_event;
use crate::keepalive::ping_backend_peers;
use crate::ledger::ReadTimeLedger;
use crate::mux::RpcMultiplexer;
use crate::peer::{PeerRegistry, PeerSender};
use crate::router::{classify, RouterDecision};
use crate::targets::TargetRegistry;
use crate::wire::{
    AgentCommand, AgentEvent, AgentReply, BrowserInbound, ForwardCdpCommand, LocalCommand,
    LocalInbound, Outbound,
};

/// Default deadline for a request forwarded to either back-end peer.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Interval between application-level keepalive pings to Browser/Local.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

const EXTENSION_GONE_CODE: u16 = 1000;
const EXTENSION_GONE_REASON: &str = "Extension disconnected";

struct RoomState {
    auth: Authenticator,
    peers: PeerRegistry,
    targets: TargetRegistry,
    ledger: ReadTimeLedger,
}

impl RoomState {
    fn new() -> Self {
        Self {
            auth: Authenticator::new(),
            peers: PeerRegistry::new(),
            targets: TargetRegistry::new(),
            ledger: ReadTimeLedger::new(),
        }
    }
}

/// One tenant room. Always held behind `Arc` so its keepalive task and
/// every connection task can share ownership.
pub struct Room {
    pub id: Arc<str>,
    state: Mutex<RoomState>,
    browser_mux: RpcMultiplexer,
    local_mux: RpcMultiplexer,
    keepalive: Mutex<Option<JoinHandle<()>>>,
}

impl Room {
    pub fn new(id: Arc<str>) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: Mutex::new(RoomState::new()),
            browser_mux: RpcMultiplexer::new(BackendKind::Extension),
            local_mux: RpcMultiplexer::new(BackendKind::LocalClient),
            keepalive: Mutex::new(None),
        })
    }

    /// Start the periodic back-end keepalive. Idempotent — calling it
    /// twice aborts the previous task first.
    pub async fn spawn_keepalive(self: &Arc<Self>) {
        let mut guard = self.keepalive.lock().await;
        if let Some(handle) = guard.take() {
            handle.abort();
        }
        let room = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
            loop {
                ticker.tick().await;
                let state = room.state.lock().await;
                let browser = state.peers.browser_sender();
                let local = state.peers.local_sender();
                drop(state);
                ping_backend_peers(browser.as_ref(), local.as_ref());
            }
        }));
    }

    pub async fn stop_keepalive(&self) {
        if let Some(handle) = self.keepalive.lock().await.take() {
            handle.abort();
        }
    }

    // ---- admission (C1/C2) ----------------------------------------

    pub async fn admit_browser(
        self: &Arc<Self>,
        passphrase: Option<&str>,
        sender: PeerSender,
    ) -> Result<(), AdmitError> {
        let mut state = self.state.lock().await;
        state.auth.validate(passphrase)?;
        state.peers.admit_browser(sender)?;
        info!(room = %self.id, "browser admitted");
        Ok(())
    }

    pub async fn admit_local(
        self: &Arc<Self>,
        passphrase: Option<&str>,
        client_id: String,
        sender: PeerSender,
    ) -> Result<(), AdmitError> {
        let mut state = self.state.lock().await;
        state.auth.validate(passphrase)?;
        state.peers.admit_local(client_id, sender)?;
        info!(room = %self.id, "local client admitted");
        Ok(())
    }

    pub async fn admit_agent(
        self: &Arc<Self>,
        passphrase: Option<&str>,
        client_id: String,
        sender: PeerSender,
    ) -> Result<(), AdmitError> {
        let mut state = self.state.lock().await;
        state.auth.validate(passphrase)?;
        state.peers.admit_agent(client_id, sender)?;
        info!(room = %self.id, "agent admitted");
        Ok(())
    }

    // ---- disconnects (C10 lifecycle) --------------------------------

    pub async fn on_browser_disconnected(self: &Arc<Self>) {
        let agents = {
            let mut state = self.state.lock().await;
            state.peers.remove_browser();
            state.targets.clear();
            state.peers.agent_snapshot()
        };
        self.browser_mux.reject_all();
        for (_, sender) in &agents {
            let _ = sender.send(Outbound::Close {
                code: EXTENSION_GONE_CODE,
                reason: EXTENSION_GONE_REASON.to_string(),
            });
        }
        warn!(room = %self.id, "browser disconnected, agents closed");
    }

    pub async fn on_local_disconnected(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        state.peers.remove_local();
        state.ledger.clear();
        drop(state);
        self.local_mux.reject_all();
        debug!(room = %self.id, "local client disconnected");
    }

    pub async fn on_agent_disconnected(self: &Arc<Self>, client_id: &str) {
        let mut state = self.state.lock().await;
        state.peers.remove_agent(client_id);
        debug!(room = %self.id, client_id, "agent disconnected");
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.peers.is_empty()
    }

    pub async fn has_browser(&self) -> bool {
        self.state.lock().await.peers.has_browser()
    }

    pub async fn has_local(&self) -> bool {
        self.state.lock().await.peers.has_local()
    }

    /// Validate a passphrase against this room's authenticator, used by
    /// the MCP tool-call endpoint which sits outside the WebSocket
    /// admission path.
    pub async fn authenticate(&self, passphrase: Option<&str>) -> Result<(), AuthError> {
        self.state.lock().await.auth.validate(passphrase)
    }

    // ---- agent command dispatch (C2/C6) ------------------------------

    /// Route one Agent command: answer locally, or forward to the
    /// Browser peer and relay its response back to `client_id`.
    pub async fn handle_agent_command(self: &Arc<Self>, client_id: &str, cmd: AgentCommand) {
        let (decision, browser_sender, agent_sender) = {
            let state = self.state.lock().await;
            let decision = classify(&cmd, &state.targets);
            (decision, state.peers.browser_sender(), state.peers.agent_sender(client_id))
        };

        let Some(agent_sender) = agent_sender else {
            return; // agent vanished between read and dispatch
        };

        match decision {
            RouterDecision::Local { synthesized, result } => {
                deliver_synthesized(&agent_sender, synthesized);
                let reply = AgentReply::ok(cmd.id, result, cmd.session_id);
                let _ = agent_sender.send(Outbound::reply(reply));
            }
            RouterDecision::LocalError { synthesized, message } => {
                deliver_synthesized(&agent_sender, synthesized);
                let reply = AgentReply::err(cmd.id, message, cmd.session_id);
                let _ = agent_sender.send(Outbound::reply(reply));
            }
            RouterDecision::Forward => {
                let Some(browser_sender) = browser_sender else {
                    let reply = AgentReply::err(
                        cmd.id,
                        crate::error::RouterError::ExtensionNotConnected.to_string(),
                        cmd.session_id,
                    );
                    let _ = agent_sender.send(Outbound::reply(reply));
                    return;
                };
                self.forward_to_browser(cmd, browser_sender, agent_sender).await;
            }
        }
    }

    async fn forward_to_browser(
        &self,
        cmd: AgentCommand,
        browser_sender: PeerSender,
        agent_sender: PeerSender,
    ) {
        let relay_id = self.browser_mux.next_id();
        let envelope = ForwardCdpCommand::new(
            relay_id,
            cmd.method.clone(),
            cmd.session_id.clone(),
            cmd.params.clone(),
        );
        let payload = serde_json::to_value(&envelope).expect("ForwardCdpCommand always serializes");
        if browser_sender.send(Outbound::Json(payload)).is_err() {
            let reply = AgentReply::err(
                cmd.id,
                MuxError::Closed { peer: BackendKind::Extension }.to_string(),
                cmd.session_id,
            );
            let _ = agent_sender.send(Outbound::reply(reply));
            return;
        }

        let outcome = self
            .browser_mux
            .await_response(relay_id, &cmd.method, DEFAULT_RPC_TIMEOUT)
            .await;
        let reply = match outcome {
            Ok(result) => AgentReply::ok(cmd.id, result, cmd.session_id),
            Err(err) => AgentReply::err(cmd.id, err.to_string(), cmd.session_id),
        };
        let _ = agent_sender.send(Outbound::reply(reply));
    }

    // ---- browser peer inbound (C3, lifecycle mirroring) --------------

    pub async fn handle_browser_message(self: &Arc<Self>, raw: serde_json::Value) {
        match BrowserInbound::parse(&raw) {
            BrowserInbound::Response { id, result, error } => {
                self.browser_mux.resolve(id, result, error);
            }
            BrowserInbound::ForwardedEvent { method, session_id, params } => {
                self.apply_lifecycle_event(&method, session_id.as_deref(), &params).await;
                let agents = self.state.lock().await.peers.agent_snapshot();
                broadcast_event(&agents, &AgentEvent { method, params, session_id });
            }
            BrowserInbound::Log { level, args } => {
                debug!(room = %self.id, %level, ?args, "browser log");
            }
            BrowserInbound::Pong => {}
            BrowserInbound::Unknown => {
                warn!(room = %self.id, "unrecognized message from browser peer");
            }
        }
    }

    async fn apply_lifecycle_event(
        &self,
        method: &str,
        session_id: Option<&str>,
        params: &Option<serde_json::Value>,
    ) {
        let mut state = self.state.lock().await;
        match method {
            "Target.attachedToTarget" => {
                if let (Some(params), Some(session_id)) = (params, session_id) {
                    if let Some(info) = params.get("targetInfo").cloned() {
                        let target_id = info
                            .get("targetId")
                            .and_then(serde_json::Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        state.targets.attach(session_id.to_string(), target_id, info);
                    }
                }
            }
            "Target.detachedFromTarget" => {
                if let Some(session_id) = session_id {
                    state.targets.detach(session_id);
                }
            }
            "Target.targetInfoChanged" => {
                if let Some(params) = params {
                    if let Some(info) = params.get("targetInfo").cloned() {
                        if let Some(target_id) = info.get("targetId").and_then(serde_json::Value::as_str) {
                            state.targets.update_info_by_target_id(target_id, info.clone());
                        }
                    }
                }
            }
            "Page.frameNavigated" => {
                if let (Some(params), Some(session_id)) = (params, session_id) {
                    let frame = params.get("frame");
                    let is_top_frame = frame
                        .and_then(|f| f.get("parentId"))
                        .map(|p| p.is_null())
                        .unwrap_or(true);
                    if is_top_frame {
                        let url = frame
                            .and_then(|f| f.get("url"))
                            .and_then(serde_json::Value::as_str)
                            .unwrap_or_default();
                        let name =
                            frame.and_then(|f| f.get("name")).and_then(serde_json::Value::as_str);
                        state.targets.update_navigation(session_id, url, name);
                    }
                }
            }
            _ => {}
        }
    }

    // ---- local peer inbound (C4) -------------------------------------

    pub async fn handle_local_message(&self, raw: serde_json::Value) {
        match LocalInbound::parse(&raw) {
            LocalInbound::Response { id, result, error } => {
                self.local_mux.resolve(id, result, error);
            }
            LocalInbound::Log { level, args } => {
                debug!(room = %self.id, %level, ?args, "local log");
            }
            LocalInbound::Pong => {}
            LocalInbound::Unknown => {
                warn!(room = %self.id, "unrecognized message from local peer");
            }
        }
    }

    /// Dispatch an RPC to the Local peer and await its response — the
    /// primitive the MCP tool surface (C4) builds `read_file`,
    /// `write_file` and `bash` on top of.
    pub async fn call_local(
        &self,
        method: &'static str,
        params: serde_json::Value,
        deadline: Duration,
    ) -> Result<serde_json::Value, MuxError> {
        let (local_sender, id) = {
            let state = self.state.lock().await;
            (state.peers.local_sender(), self.local_mux.next_id())
        };
        let Some(local_sender) = local_sender else {
            return Err(MuxError::Closed { peer: BackendKind::LocalClient });
        };
        let command = LocalCommand { id, method, params };
        let payload = serde_json::to_value(&command).expect("LocalCommand always serializes");
        if local_sender.send(Outbound::Json(payload)).is_err() {
            return Err(MuxError::Closed { peer: BackendKind::LocalClient });
        }
        self.local_mux.await_response(id, method, deadline).await
    }

    // ---- read-time ledger (C8) ---------------------------------------

    pub async fn record_read(&self, absolute_path: String, mtime: i64) {
        self.state.lock().await.ledger.record(absolute_path, mtime);
    }

    pub async fn check_write_allowed(&self, absolute_path: &str) -> Result<i64, LedgerError> {
        let state = self.state.lock().await;
        match state.ledger.get(absolute_path) {
            Some(mtime) => Ok(mtime),
            None => Err(LedgerError::NotRead { path: absolute_path.to_string() }),
        }
    }
}

fn deliver_synthesized(
    agent_sender: &PeerSender,
    synthesized: Vec<(String, serde_json::Value, Option<String>)>,
) {
    for (method, params, session_id) in synthesized {
        let event = AgentEvent { method, params: Some(params), session_id };
        let _ = agent_sender.send(Outbound::event(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc::unbounded_channel;

    fn room() -> Arc<Room> {
        Room::new(Arc::from("test-room"))
    }

    #[tokio::test]
    async fn first_browser_admission_sets_room_passphrase() {
        let room = room();
        let (tx, _rx) = unbounded_channel();
        assert!(room.admit_browser(Some("secret"), tx).await.is_ok());
    }

    #[tokio::test]
    async fn second_browser_admission_conflicts() {
        let room = room();
        let (tx1, _rx1) = unbounded_channel();
        let (tx2, _rx2) = unbounded_channel();
        room.admit_browser(Some("secret"), tx1).await.unwrap();
        assert_eq!(room.admit_browser(Some("secret"), tx2).await, Err(AdmitError::Conflict));
    }

    #[tokio::test]
    async fn wrong_passphrase_is_forbidden() {
        let room = room();
        let (tx1, _rx1) = unbounded_channel();
        let (tx2, _rx2) = unbounded_channel();
        room.admit_browser(Some("secret"), tx1).await.unwrap();
        assert_eq!(
            room.admit_local(Some("nope"), "c1".into(), tx2).await,
            Err(AdmitError::Auth(crate::error::AuthError::Forbidden))
        );
    }

    #[tokio::test]
    async fn browser_disconnect_clears_targets_and_closes_agents() {
        let room = room();
        let (btx, _brx) = unbounded_channel();
        room.admit_browser(Some("secret"), btx).await.unwrap();

        let (atx, mut arx) = unbounded_channel();
        room.admit_agent(Some("secret"), "agent-1".into(), atx).await.unwrap();

        room.handle_browser_message(json!({
            "method": "forwardCDPEvent",
            "params": {
                "method": "Target.attachedToTarget",
                "sessionId": "s1",
                "params": {"targetInfo": {"targetId": "t1", "type": "page"}}
            }
        }))
        .await;
        let _ = arx.try_recv(); // drain the fanned-out attachedToTarget event

        room.on_browser_disconnected().await;

        match arx.try_recv() {
            Ok(Outbound::Close { code, reason }) => {
                assert_eq!(code, 1000);
                assert_eq!(reason, "Extension disconnected");
            }
            other => panic!("expected Close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn local_disconnect_clears_ledger_but_not_agents() {
        let room = room();
        let (ltx, _lrx) = unbounded_channel();
        room.admit_local(Some("secret"), "local-1".into(), ltx).await.unwrap();
        room.record_read("/tmp/f".into(), 1).await;
        assert!(room.check_write_allowed("/tmp/f").await.is_ok());

        room.on_local_disconnected().await;
        assert_eq!(
            room.check_write_allowed("/tmp/f").await,
            Err(LedgerError::NotRead { path: "/tmp/f".into() })
        );
    }

    #[tokio::test]
    async fn agent_command_answered_locally_without_touching_browser() {
        let room = room();
        let (atx, mut arx) = unbounded_channel();
        room.admit_agent(Some("secret"), "agent-1".into(), atx).await.unwrap();

        room.handle_agent_command(
            "agent-1",
            AgentCommand { id: 1, method: "Browser.getVersion".to_string(), params: None, session_id: None },
        )
        .await;

        match arx.try_recv() {
            Ok(Outbound::Json(v)) => assert_eq!(v["result"]["product"], "Chrome/Cloudflare-Relay"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn agent_command_without_browser_errors_immediately() {
        let room = room();
        let (atx, mut arx) = unbounded_channel();
        room.admit_agent(Some("secret"), "agent-1".into(), atx).await.unwrap();

        room.handle_agent_command(
            "agent-1",
            AgentCommand {
                id: 2,
                method: "Page.navigate".to_string(),
                params: Some(json!({"url": "https://example.com"})),
                session_id: None,
            },
        )
        .await;

        match arx.try_recv() {
            Ok(Outbound::Json(v)) => assert_eq!(v["error"]["message"], "Extension not connected"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn agent_command_forwards_and_relays_browser_response() {
        let room = room();
        let (btx, mut brx) = unbounded_channel();
        room.admit_browser(Some("secret"), btx).await.unwrap();
        let (atx, mut arx) = unbounded_channel();
        room.admit_agent(Some("secret"), "agent-1".into(), atx).await.unwrap();

        let room2 = Arc::clone(&room);
        let forward_task = tokio::spawn(async move {
            room2
                .handle_agent_command(
                    "agent-1",
                    AgentCommand {
                        id: 9,
                        method: "Page.navigate".to_string(),
                        params: Some(json!({"url": "https://example.com"})),
                        session_id: None,
                    },
                )
                .await;
        });

        let sent = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Ok(Outbound::Json(v)) = brx.try_recv() {
                    return v;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        let relay_id = sent["id"].as_u64().unwrap();

        room.handle_browser_message(json!({"id": relay_id, "result": {"frameId": "f1"}})).await;
        forward_task.await.unwrap();

        match arx.try_recv() {
            Ok(Outbound::Json(v)) => {
                assert_eq!(v["id"], 9);
                assert_eq!(v["result"]["frameId"], "f1");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
