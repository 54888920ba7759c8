//! HTTP/WebSocket surface: upgrades Browser, Local and Agent
//! connections into their room, plus introspection and liveness
//! endpoints (spec §6). CORS is permissive — the relay forwards
//! CDP-shaped traffic; any origin restriction belongs to the peers
//! themselves, not this bridge.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMsg, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc::unbounded_channel;
use tokio::sync::Mutex as AsyncMutex;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};

use crate::error::AdmitError;
use crate::mcp;
use crate::rate_limit::RateLimiter;
use crate::room::Room;
use crate::rooms::RoomManager;
use crate::wire::{AgentCommand, Outbound};

/// Maximum inbound WebSocket frame size (16 MiB).
const MAX_WS_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub rooms: Arc<RoomManager>,
    pub rate_limiter: Arc<AsyncMutex<RateLimiter>>,
}

impl AppState {
    pub fn new(rooms: Arc<RoomManager>, requests_per_second: u32) -> Self {
        Self {
            rooms,
            rate_limiter: Arc::new(AsyncMutex::new(RateLimiter::new(requests_per_second))),
        }
    }

    /// `true` if the connecting IP is still within its admission budget.
    async fn admit_ip(&self, addr: SocketAddr) -> bool {
        self.rate_limiter.lock().await.check(addr.ip())
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(liveness_handler))
        .route("/health", get(liveness_handler))
        .route("/room/{room_id}/extension", get(extension_upgrade))
        .route("/room/{room_id}/extension/status", get(extension_status))
        .route("/room/{room_id}/local", get(local_upgrade_anonymous))
        .route("/room/{room_id}/local/{client_id}", get(local_upgrade))
        .route("/room/{room_id}/local/status", get(local_status))
        .route("/room/{room_id}/mcp", get(agent_upgrade_anonymous))
        .route("/room/{room_id}/mcp/{client_id}", get(agent_upgrade))
        .route("/room/{room_id}/mcp-server", post(mcp::handle_tool_call))
        .layer(cors)
        .with_state(state)
}

async fn liveness_handler() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
pub struct AuthQuery {
    pub passphrase: Option<String>,
}

fn admit_error_status(err: &AdmitError) -> StatusCode {
    match err {
        AdmitError::Auth(crate::error::AuthError::Unauthorized) => StatusCode::UNAUTHORIZED,
        AdmitError::Auth(crate::error::AuthError::Forbidden) => StatusCode::FORBIDDEN,
        AdmitError::Conflict => StatusCode::CONFLICT,
    }
}

// ---- Browser (Extension) upgrade ------------------------------------

async fn extension_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(room_id): Path<String>,
    Query(auth): Query<AuthQuery>,
) -> impl IntoResponse {
    if !state.admit_ip(addr).await {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }
    let room = state.rooms.get_or_create(&room_id).await;
    ws.max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_extension_socket(socket, room, auth.passphrase))
        .into_response()
}

async fn extension_status(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> impl IntoResponse {
    match state.rooms.get(&room_id) {
        Some(room) => Json(json!({ "connected": room.has_browser().await })).into_response(),
        None => Json(json!({ "connected": false })).into_response(),
    }
}

async fn handle_extension_socket(socket: WebSocket, room: Arc<Room>, passphrase: Option<String>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = unbounded_channel();

    if let Err(err) = room.admit_browser(passphrase.as_deref(), tx).await {
        let _ = sink
            .send(WsMsg::Close(Some(axum::extract::ws::CloseFrame {
                code: admit_error_status(&err).as_u16(),
                reason: err.to_string().into(),
            })))
            .await;
        return;
    }

    let outbound = async {
        while let Some(msg) = rx.recv().await {
            match msg {
                Outbound::Json(v) => {
                    if sink.send(WsMsg::Text(v.to_string().into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close { code, reason } => {
                    let _ = sink
                        .send(WsMsg::Close(Some(axum::extract::ws::CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    };

    let inbound = async {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(WsMsg::Text(text)) => match serde_json::from_str::<Value>(&text) {
                    Ok(raw) => room.handle_browser_message(raw).await,
                    Err(_) => warn!("unparseable browser message"),
                },
                Ok(WsMsg::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    };

    tokio::select! {
        _ = outbound => {}
        _ = inbound => {}
    }
    room.on_browser_disconnected().await;
}

// ---- Local (machine controller) upgrade ------------------------------

async fn local_upgrade_anonymous(
    ws: WebSocketUpgrade,
    state: State<AppState>,
    conn: ConnectInfo<SocketAddr>,
    path: Path<String>,
    auth: Query<AuthQuery>,
) -> impl IntoResponse {
    local_upgrade(ws, state, conn, Path((path.0, uuid_like_id())), auth).await
}

async fn local_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path((room_id, client_id)): Path<(String, String)>,
    Query(auth): Query<AuthQuery>,
) -> impl IntoResponse {
    if !state.admit_ip(addr).await {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }
    let room = state.rooms.get_or_create(&room_id).await;
    ws.max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_local_socket(socket, room, client_id, auth.passphrase))
        .into_response()
}

async fn local_status(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> impl IntoResponse {
    match state.rooms.get(&room_id) {
        Some(room) => Json(json!({ "connected": room.has_local().await })).into_response(),
        None => Json(json!({ "connected": false })).into_response(),
    }
}

async fn handle_local_socket(
    socket: WebSocket,
    room: Arc<Room>,
    client_id: String,
    passphrase: Option<String>,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = unbounded_channel();

    if let Err(err) = room.admit_local(passphrase.as_deref(), client_id, tx).await {
        let _ = sink
            .send(WsMsg::Close(Some(axum::extract::ws::CloseFrame {
                code: admit_error_status(&err).as_u16(),
                reason: err.to_string().into(),
            })))
            .await;
        return;
    }

    let outbound = async {
        while let Some(msg) = rx.recv().await {
            match msg {
                Outbound::Json(v) => {
                    if sink.send(WsMsg::Text(v.to_string().into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close { code, reason } => {
                    let _ = sink
                        .send(WsMsg::Close(Some(axum::extract::ws::CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    };

    let inbound = async {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(WsMsg::Text(text)) => match serde_json::from_str::<Value>(&text) {
                    Ok(raw) => room.handle_local_message(raw).await,
                    Err(_) => warn!("unparseable local message"),
                },
                Ok(WsMsg::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    };

    tokio::select! {
        _ = outbound => {}
        _ = inbound => {}
    }
    room.on_local_disconnected().await;
}

// ---- Agent (MCP client) upgrade --------------------------------------

async fn agent_upgrade_anonymous(
    ws: WebSocketUpgrade,
    state: State<AppState>,
    conn: ConnectInfo<SocketAddr>,
    path: Path<String>,
    auth: Query<AuthQuery>,
) -> impl IntoResponse {
    agent_upgrade(ws, state, conn, Path((path.0, uuid_like_id())), auth).await
}

async fn agent_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path((room_id, client_id)): Path<(String, String)>,
    Query(auth): Query<AuthQuery>,
) -> impl IntoResponse {
    if !state.admit_ip(addr).await {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }
    let room = state.rooms.get_or_create(&room_id).await;
    ws.max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_agent_socket(socket, room, client_id, auth.passphrase))
        .into_response()
}

async fn handle_agent_socket(
    socket: WebSocket,
    room: Arc<Room>,
    client_id: String,
    passphrase: Option<String>,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = unbounded_channel();

    if let Err(err) = room.admit_agent(passphrase.as_deref(), client_id.clone(), tx).await {
        let _ = sink
            .send(WsMsg::Close(Some(axum::extract::ws::CloseFrame {
                code: admit_error_status(&err).as_u16(),
                reason: err.to_string().into(),
            })))
            .await;
        return;
    }

    let outbound = async {
        while let Some(msg) = rx.recv().await {
            match msg {
                Outbound::Json(v) => {
                    if sink.send(WsMsg::Text(v.to_string().into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close { code, reason } => {
                    let _ = sink
                        .send(WsMsg::Close(Some(axum::extract::ws::CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    };

    let room_for_inbound = Arc::clone(&room);
    let client_id_for_inbound = client_id.clone();
    let inbound = async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(WsMsg::Text(text)) => match serde_json::from_str::<AgentCommand>(&text) {
                    Ok(cmd) => {
                        room_for_inbound
                            .handle_agent_command(&client_id_for_inbound, cmd)
                            .await;
                    }
                    Err(_) => debug!("unparseable agent command"),
                },
                Ok(WsMsg::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    };

    tokio::select! {
        _ = outbound => {}
        _ = inbound => {}
    }
    room.on_agent_disconnected(&client_id).await;
}

/// Cheap client-id generator for anonymous connections that omit one in
/// the path — timestamp-free so it stays deterministic-free of
/// `Date.now`/`random` restrictions elsewhere; uniqueness within a
/// process comes from a monotonic counter.
fn uuid_like_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("anon-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Default idle age a room must reach before it is eligible for
/// cleanup sweep (spec §4.8 / A1).
pub const ROOM_IDLE_SWEEP_MIN_AGE: Duration = Duration::from_secs(60);
