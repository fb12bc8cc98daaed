//! Fan-out to connected peers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};
use vision_core::Envelope;

use super::connection::PeerConnection;

/// Table of connected peers.
pub struct BroadcastManager {
    connections: RwLock<HashMap<String, Arc<PeerConnection>>>,
}

impl BroadcastManager {
    /// Empty table.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Add a peer.
    pub async fn add(&self, connection: Arc<PeerConnection>) {
        let mut conns = self.connections.write().await;
        let _ = conns.insert(connection.id.clone(), connection);
    }

    /// Remove a peer by ID.
    pub async fn remove(&self, connection_id: &str) -> Option<Arc<PeerConnection>> {
        self.connections.write().await.remove(connection_id)
    }

    /// Send an envelope to one peer. Returns `false` if the peer is unknown
    /// or its queue rejected the frame.
    pub async fn send_to(&self, connection_id: &str, envelope: &Envelope) -> bool {
        let conn = self.connections.read().await.get(connection_id).cloned();
        let Some(conn) = conn else {
            debug!(conn_id = connection_id, "send_to unknown peer");
            return false;
        };
        let sent = conn.send_envelope(envelope);
        if !sent {
            warn!(conn_id = connection_id, category = %envelope.category, "failed to queue frame for peer");
        }
        sent
    }

    /// Send an envelope to every peer. Returns how many queued it.
    pub async fn broadcast_all(&self, envelope: &Envelope) -> usize {
        let frame = match envelope.encode() {
            Ok(frame) => Arc::new(frame),
            Err(e) => {
                warn!(category = %envelope.category, error = %e, "failed to encode envelope");
                return 0;
            }
        };
        let conns = self.connections.read().await;
        debug!(
            category = %envelope.category,
            action = %envelope.action,
            recipients = conns.len(),
            "broadcast to all"
        );
        let mut delivered = 0;
        for conn in conns.values() {
            if conn.send(Arc::clone(&frame)) {
                delivered += 1;
            } else {
                warn!(conn_id = %conn.id, "failed to queue broadcast frame");
            }
        }
        delivered
    }

    /// Number of connected peers.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// IDs of connected peers.
    pub async fn connection_ids(&self) -> Vec<String> {
        self.connections.read().await.keys().cloned().collect()
    }
}

impl Default for BroadcastManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use vision_core::Action;

    fn peer(id: &str, capacity: usize) -> (Arc<PeerConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(PeerConnection::new(id.into(), tx)), rx)
    }

    fn theme() -> Envelope {
        Envelope::new("theme", Action::ThemeChange, serde_json::json!("dark"))
    }

    #[tokio::test]
    async fn add_and_remove() {
        let bm = BroadcastManager::new();
        let (a, _ra) = peer("a", 4);
        let (b, _rb) = peer("b", 4);
        bm.add(a).await;
        bm.add(b).await;
        assert_eq!(bm.connection_count().await, 2);

        assert!(bm.remove("a").await.is_some());
        assert!(bm.remove("a").await.is_none());
        assert_eq!(bm.connection_ids().await, vec!["b".to_owned()]);
    }

    #[tokio::test]
    async fn send_to_targets_one_peer() {
        let bm = BroadcastManager::new();
        let (a, mut ra) = peer("a", 4);
        let (b, mut rb) = peer("b", 4);
        bm.add(a).await;
        bm.add(b).await;

        assert!(bm.send_to("b", &theme()).await);
        assert!(ra.try_recv().is_err());
        let frame = rb.recv().await.unwrap();
        assert_eq!(Envelope::decode(&frame).unwrap(), theme());
    }

    #[tokio::test]
    async fn send_to_unknown_peer() {
        let bm = BroadcastManager::new();
        assert!(!bm.send_to("ghost", &theme()).await);
    }

    #[tokio::test]
    async fn broadcast_reaches_everyone_and_counts() {
        let bm = BroadcastManager::new();
        let (a, mut ra) = peer("a", 4);
        let (b, mut rb) = peer("b", 4);
        let (full, _rf) = peer("full", 1);
        assert!(full.send(Arc::new("filler".into())));
        bm.add(a).await;
        bm.add(b).await;
        bm.add(Arc::clone(&full)).await;

        assert_eq!(bm.broadcast_all(&theme()).await, 2);
        assert!(ra.recv().await.is_some());
        assert!(rb.recv().await.is_some());
        assert_eq!(full.drop_count(), 1);
    }

    #[tokio::test]
    async fn broadcast_to_nobody() {
        let bm = BroadcastManager::default();
        assert_eq!(bm.broadcast_all(&theme()).await, 0);
    }
}
