//! RPC Multiplexer (C3/C4): allocates monotonically increasing
//! correlation ids, tracks one pending request per id, and resolves or
//! times out the caller's future independent of everything else the
//! room is doing. One multiplexer instance is used for the Browser
//! peer and a separate instance (its own counter, its own table) for
//! the Local peer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;

use crate::error::{BackendKind, MuxError};

type RpcOutcome = Result<Value, MuxError>;

struct Pending {
    resolver: oneshot::Sender<RpcOutcome>,
}

/// A pending-request table keyed by correlation id, used to pair
/// asynchronous RPC responses with their callers (spec §9).
pub struct RpcMultiplexer {
    kind: BackendKind,
    next_id: AtomicU64,
    pending: DashMap<u64, Pending>,
}

impl RpcMultiplexer {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            // Ids start at 1; 0 is never dispatched so it can be used as
            // a sentinel by callers that need one.
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
        }
    }

    /// Allocate the next id. The counter never resets during the life
    /// of the room — it survives reconnects of other peers.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Register `id` as in-flight and await its resolution, a matching
    /// disconnect rejection, or `deadline` elapsing.
    pub async fn await_response(&self, id: u64, method: &str, deadline: Duration) -> RpcOutcome {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, Pending { resolver: tx });

        match timeout(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Resolver dropped without sending: treat as a closed peer.
            Ok(Err(_)) => Err(MuxError::Closed { peer: self.kind }),
            Err(_elapsed) => {
                self.pending.remove(&id);
                Err(MuxError::Timeout {
                    peer: self.kind,
                    timeout_ms: deadline.as_millis() as u64,
                    method: method.to_string(),
                })
            }
        }
    }

    /// Resolve a pending request by id — a response arrived from the
    /// back-end peer. A no-op if `id` is unknown (already timed out or
    /// was never dispatched by us).
    pub fn resolve(&self, id: u64, result: Option<Value>, error: Option<String>) {
        if let Some((_, pending)) = self.pending.remove(&id) {
            let outcome = match error {
                Some(message) => Err(MuxError::Remote(message)),
                None => Ok(result.unwrap_or(Value::Null)),
            };
            let _ = pending.resolver.send(outcome);
        }
    }

    /// Reject every in-flight request as a group — the back-end peer
    /// disconnected.
    pub fn reject_all(&self) {
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.resolver.send(Err(MuxError::Closed { peer: self.kind }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_are_monotonically_increasing() {
        let mux = RpcMultiplexer::new(BackendKind::Extension);
        let a = mux.next_id();
        let b = mux.next_id();
        let c = mux.next_id();
        assert!(a < b);
        assert!(b < c);
    }

    #[tokio::test]
    async fn resolve_completes_the_pending_future() {
        let mux = RpcMultiplexer::new(BackendKind::Extension);
        let id = mux.next_id();
        let waiter = mux.await_response(id, "Foo.bar", Duration::from_secs(5));
        mux.resolve(id, Some(json!({"ok": true})), None);
        assert_eq!(waiter.await.unwrap(), json!({"ok": true}));
    }

    #[tokio::test]
    async fn resolve_with_error_surfaces_remote_message() {
        let mux = RpcMultiplexer::new(BackendKind::Extension);
        let id = mux.next_id();
        let waiter = mux.await_response(id, "Foo.bar", Duration::from_secs(5));
        mux.resolve(id, None, Some("boom".to_string()));
        match waiter.await {
            Err(MuxError::Remote(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_rejects_with_exact_message_shape() {
        let mux = RpcMultiplexer::new(BackendKind::Extension);
        let id = mux.next_id();
        let waiter = mux.await_response(id, "Page.navigate", Duration::from_millis(30_000));
        tokio::time::advance(Duration::from_millis(30_001)).await;
        match waiter.await {
            Err(MuxError::Timeout {
                peer,
                timeout_ms,
                method,
            }) => {
                assert_eq!(peer, BackendKind::Extension);
                assert_eq!(timeout_ms, 30_000);
                assert_eq!(method, "Page.navigate");
                assert_eq!(
                    MuxError::Timeout {
                        peer,
                        timeout_ms,
                        method
                    }
                    .to_string(),
                    "Extension request timeout after 30000ms: Page.navigate"
                );
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(mux.pending_count(), 0);
    }

    #[tokio::test]
    async fn reject_all_closes_every_pending_request() {
        let mux = RpcMultiplexer::new(BackendKind::LocalClient);
        let id1 = mux.next_id();
        let id2 = mux.next_id();
        let w1 = mux.await_response(id1, "file.read", Duration::from_secs(5));
        let w2 = mux.await_response(id2, "file.write", Duration::from_secs(5));
        mux.reject_all();
        assert_eq!(w1.await, Err(MuxError::Closed { peer: BackendKind::LocalClient }));
        assert_eq!(w2.await, Err(MuxError::Closed { peer: BackendKind::LocalClient }));
    }

    #[test]
    fn pending_ids_are_unique_while_in_flight() {
        let mux = RpcMultiplexer::new(BackendKind::Extension);
        let id = mux.next_id();
        mux.pending.insert(id, Pending { resolver: oneshot::channel().0 });
        // Re-inserting under the same key (simulating a bug) must not
        // create two live entries — DashMap's insert overwrites, so the
        // multiplexer must never reuse an id while one is outstanding.
        assert_eq!(mux.pending_count(), 1);
    }
}
