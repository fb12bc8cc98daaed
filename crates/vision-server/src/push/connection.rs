//! Per-peer connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;
use vision_core::Envelope;

/// A connected push-channel peer.
pub struct PeerConnection {
    /// Unique connection ID.
    pub id: String,
    /// Outbound queue drained by the socket's writer task.
    tx: mpsc::Sender<Arc<String>>,
    /// Monotonic connect time.
    pub connected_at: Instant,
    /// Wall-clock connect time.
    pub connected_at_utc: DateTime<Utc>,
    /// Last pong (or connect time).
    last_pong: Mutex<Instant>,
    /// Frames dropped because the queue was full or closed.
    dropped_frames: AtomicU64,
}

impl PeerConnection {
    /// Create a connection writing into `tx`.
    pub fn new(id: String, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            connected_at_utc: Utc::now(),
            last_pong: Mutex::new(now),
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// Fresh `peer_<uuid v7>` identifier.
    pub fn generate_id() -> String {
        format!("peer_{}", Uuid::now_v7())
    }

    /// Queue a frame. Returns `false` and counts the drop if the queue is
    /// full or the writer has gone away.
    pub fn send(&self, frame: Arc<String>) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Encode and queue an envelope.
    pub fn send_envelope(&self, envelope: &Envelope) -> bool {
        match envelope.encode() {
            Ok(frame) => self.send(Arc::new(frame)),
            Err(e) => {
                warn!(conn_id = %self.id, error = %e, "failed to encode envelope");
                false
            }
        }
    }

    /// Frames dropped so far.
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Record a pong.
    pub fn mark_alive(&self) {
        *self.last_pong.lock() = Instant::now();
    }

    /// Time since the last pong, or since connect if none arrived.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.id)
            .field("connected_at_utc", &self.connected_at_utc)
            .field("dropped_frames", &self.drop_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vision_core::Action;

    fn make_connection(capacity: usize) -> (PeerConnection, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (PeerConnection::new("peer_1".into(), tx), rx)
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = PeerConnection::generate_id();
        let b = PeerConnection::generate_id();
        assert_ne!(a, b);
        assert!(a.starts_with("peer_"));
    }

    #[tokio::test]
    async fn send_queues_frame() {
        let (conn, mut rx) = make_connection(8);
        assert!(conn.send(Arc::new("hello".into())));
        assert_eq!(&*rx.recv().await.unwrap(), "hello");
        assert_eq!(conn.drop_count(), 0);
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.send(Arc::new("one".into())));
        assert!(!conn.send(Arc::new("two".into())));
        assert!(!conn.send(Arc::new("three".into())));
        assert_eq!(conn.drop_count(), 2);
    }

    #[test]
    fn closed_queue_drops_and_counts() {
        let (conn, rx) = make_connection(8);
        drop(rx);
        assert!(!conn.send(Arc::new("x".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn send_envelope_encodes() {
        let (conn, mut rx) = make_connection(8);
        let envelope = Envelope::new("panel", Action::FullScreen, serde_json::json!({"on": true}));
        assert!(conn.send_envelope(&envelope));
        let frame = rx.recv().await.unwrap();
        assert_eq!(Envelope::decode(&frame).unwrap(), envelope);
    }

    #[test]
    fn mark_alive_resets_pong_clock() {
        let (conn, _rx) = make_connection(1);
        std::thread::sleep(Duration::from_millis(10));
        assert!(conn.last_pong_elapsed() >= Duration::from_millis(10));
        conn.mark_alive();
        assert!(conn.last_pong_elapsed() < Duration::from_millis(10));
        assert!(conn.age() >= Duration::from_millis(10));
    }
}
