//! Event Broadcaster (C7): fans a single event out to every connected
//! Agent peer, isolating one peer's dead channel from the rest.

use crate::peer::PeerSender;
use crate::wire::{AgentEvent, Outbound};

/// Send `event` to every `(client_id, sender)` pair in `agents`. A
/// closed channel (peer already disconnected, send racing teardown) is
/// silently skipped — the room will reap it when the disconnect
/// notification arrives, not here.
pub fn broadcast_event(agents: &[(String, PeerSender)], event: &AgentEvent) {
    for (_client_id, sender) in agents {
        let _ = sender.send(Outbound::event(event.clone()));
    }
}
