//! Peer Registry (C1): admits and tracks the live WebSocket peers of a
//! room, enforcing the single-Browser / single-Local / unique-Agent
//! client-id invariants from spec §4.2.

use std::collections::HashMap;

use tokio::sync::mpsc::UnboundedSender;

use crate::error::AdmitError;
use crate::wire::Outbound;

/// Channel a room uses to push outbound frames to one connected peer.
/// The WebSocket task owning the actual socket drains this channel and
/// forwards to the wire — this is the externalized per-connection state
/// the hibernation-capable transport model requires (spec §9): nothing
/// about a peer lives in a task closure that only the room can reach.
pub type PeerSender = UnboundedSender<Outbound>;

/// What role a connected peer was admitted as. Fixed at admission time
/// and never changes (spec §3 Peer invariant).
#[derive(Debug, Clone)]
pub enum PeerTag {
    Browser,
    Local { client_id: String },
    Agent { client_id: String },
}

pub struct ConnectedPeer {
    pub tag: PeerTag,
    pub sender: PeerSender,
}

/// The set of live peers in one room.
#[derive(Default)]
pub struct PeerRegistry {
    browser: Option<ConnectedPeer>,
    local: Option<ConnectedPeer>,
    agents: HashMap<String, ConnectedPeer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit_browser(&mut self, sender: PeerSender) -> Result<(), AdmitError> {
        if self.browser.is_some() {
            return Err(AdmitError::Conflict);
        }
        self.browser = Some(ConnectedPeer {
            tag: PeerTag::Browser,
            sender,
        });
        Ok(())
    }

    pub fn admit_local(&mut self, client_id: String, sender: PeerSender) -> Result<(), AdmitError> {
        if self.local.is_some() {
            return Err(AdmitError::Conflict);
        }
        self.local = Some(ConnectedPeer {
            tag: PeerTag::Local { client_id },
            sender,
        });
        Ok(())
    }

    pub fn admit_agent(
        &mut self,
        client_id: String,
        sender: PeerSender,
    ) -> Result<(), AdmitError> {
        if self.agents.contains_key(&client_id) {
            return Err(AdmitError::Conflict);
        }
        self.agents.insert(
            client_id.clone(),
            ConnectedPeer {
                tag: PeerTag::Agent { client_id },
                sender,
            },
        );
        Ok(())
    }

    pub fn remove_browser(&mut self) -> Option<ConnectedPeer> {
        self.browser.take()
    }

    pub fn remove_local(&mut self) -> Option<ConnectedPeer> {
        self.local.take()
    }

    pub fn remove_agent(&mut self, client_id: &str) -> Option<ConnectedPeer> {
        self.agents.remove(client_id)
    }

    pub fn has_browser(&self) -> bool {
        self.browser.is_some()
    }

    pub fn has_local(&self) -> bool {
        self.local.is_some()
    }

    pub fn browser_sender(&self) -> Option<PeerSender> {
        self.browser.as_ref().map(|p| p.sender.clone())
    }

    pub fn local_sender(&self) -> Option<PeerSender> {
        self.local.as_ref().map(|p| p.sender.clone())
    }

    pub fn agent_sender(&self, client_id: &str) -> Option<PeerSender> {
        self.agents.get(client_id).map(|p| p.sender.clone())
    }

    /// Snapshot of currently-attached agents, for fan-out (C7) without
    /// holding the registry lock while sending (spec §4.6 "snapshotting").
    pub fn agent_snapshot(&self) -> Vec<(String, PeerSender)> {
        self.agents
            .iter()
            .map(|(id, p)| (id.clone(), p.sender.clone()))
            .collect()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.browser.is_none() && self.local.is_none() && self.agents.is_empty()
    }
}
