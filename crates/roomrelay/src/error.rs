//! Error taxonomy for the room relay.
//!
//! Each module owns a narrow `thiserror` enum; the HTTP/WS boundary is
//! the only place these get converted to status codes or wire-level
//! error strings. `Display` text is part of the externally observable
//! contract (see spec §7/§8) and must not be changed casually.

use thiserror::Error;

/// Errors from passphrase admission (HTTP-level, pre-upgrade).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("passphrase required")]
    Unauthorized,
    #[error("passphrase mismatch")]
    Forbidden,
}

/// Errors admitting a peer into a room's registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmitError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("role already connected in this room")]
    Conflict,
}

/// Which back-end peer class an RPC multiplexer error concerns.
/// `Display` text must match spec.md exactly ("Extension" / "Local client").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Extension,
    LocalClient,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Extension => write!(f, "Extension"),
            Self::LocalClient => write!(f, "Local client"),
        }
    }
}

/// Errors from an in-flight RPC dispatched through a multiplexer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MuxError {
    #[error("{peer} request timeout after {timeout_ms}ms: {method}")]
    Timeout {
        peer: BackendKind,
        timeout_ms: u64,
        method: String,
    },
    #[error("{peer} connection closed")]
    Closed { peer: BackendKind },
    /// Error message forwarded verbatim from the back-end peer.
    #[error("{0}")]
    Remote(String),
}

/// Errors the Command Router raises locally (never forwarded).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("Extension not connected")]
    ExtensionNotConnected,
    #[error("Target {0} not found in connected targets")]
    TargetNotFound(String),
}

/// Errors from the read-time ledger's write-after-read precondition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error(
        "Cannot write to {path}: file has not been read yet. Read the file first to ensure you have the latest content."
    )]
    NotRead { path: String },
}
