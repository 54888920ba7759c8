//! Keepalive (C9): a pure helper for pinging whichever back-end peers
//! are currently connected. The periodic timer itself lives in the
//! room's lifecycle task, which owns the interval and the abort handle.

use crate::peer::PeerSender;
use crate::wire::{ping_message, Outbound};

/// Send an application-level ping to Browser and/or Local if present.
/// A peer with no connection (`None`) is simply skipped — there is no
/// agent-facing keepalive, since dead agent sockets are reaped by their
/// own read loop noticing the close.
pub fn ping_backend_peers(browser: Option<&PeerSender>, local: Option<&PeerSender>) {
    let ping = Outbound::Json(ping_message());
    if let Some(sender) = browser {
        let _ = sender.send(ping.clone());
    }
    if let Some(sender) = local {
        let _ = sender.send(ping);
    }
}
