//! Multi-tenant WebSocket relay bridging a Browser extension, a Local
//! machine-controller and MCP Agent clients inside per-tenant rooms.

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod keepalive;
pub mod ledger;
pub mod mcp;
pub mod mux;
pub mod peer;
pub mod rate_limit;
pub mod room;
pub mod router;
pub mod rooms;
pub mod targets;
pub mod wire;
