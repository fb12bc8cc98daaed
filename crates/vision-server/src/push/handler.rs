//! Inbound frame handling.

use async_trait::async_trait;
use tracing::{debug, info, warn};
use vision_core::{Action, Envelope};

use super::broadcast::BroadcastManager;
use crate::fixtures::{FixtureStore, not_found_body};

/// Reacts to decoded inbound envelopes.
#[async_trait]
pub trait FrameHandler: Send + Sync + 'static {
    /// Handle `envelope` received from peer `from`. `peers` can be used to
    /// reply or fan out.
    async fn handle(&self, from: &str, envelope: Envelope, peers: &BroadcastManager);
}

/// Logs every inbound envelope and does nothing else.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogOnly;

#[async_trait]
impl FrameHandler for LogOnly {
    async fn handle(&self, from: &str, envelope: Envelope, _peers: &BroadcastManager) {
        info!(
            conn_id = from,
            category = %envelope.category,
            action = %envelope.action,
            "inbound frame"
        );
    }
}

/// Answers data requests from the fixture store.
///
/// - `getData` with a `chartName` field: the fixture named `chartName` is
///   sent back to the requester on the request's category, as a `getData`
///   envelope whose payload is the raw document. A missing fixture yields
///   the not-found body instead.
/// - `fullScreen` and `themeChange`: relayed to every connected peer.
/// - anything else: logged and ignored.
#[derive(Clone, Debug)]
pub struct FixtureResponder {
    store: FixtureStore,
}

impl FixtureResponder {
    /// Responder backed by `store`.
    pub fn new(store: FixtureStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl FrameHandler for FixtureResponder {
    async fn handle(&self, from: &str, envelope: Envelope, peers: &BroadcastManager) {
        match envelope.action {
            Action::GetData => {
                let Some(chart) = envelope.chart_name() else {
                    debug!(conn_id = from, category = %envelope.category, "getData without chartName ignored");
                    return;
                };
                let document = match self.store.read(chart).await {
                    Ok(document) => document,
                    Err(e) => {
                        warn!(conn_id = from, chart, error = %e, "requested fixture unavailable");
                        not_found_body()
                    }
                };
                let reply = Envelope::get_data_raw(envelope.category.as_str(), document);
                let _ = peers.send_to(from, &reply).await;
            }
            Action::FullScreen | Action::ThemeChange => {
                let delivered = peers.broadcast_all(&envelope).await;
                debug!(conn_id = from, action = %envelope.action, delivered, "relayed to peers");
            }
            Action::Other(ref action) => {
                debug!(conn_id = from, category = %envelope.category, action, "unhandled action ignored");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::push::connection::PeerConnection;
    use assert_matches::assert_matches;
    use serde_json::json;
    use tokio::sync::mpsc;
    use vision_core::Delivery;

    async fn setup(ids: &[&str]) -> (BroadcastManager, Vec<mpsc::Receiver<Arc<String>>>) {
        let bm = BroadcastManager::new();
        let mut receivers = Vec::new();
        for id in ids {
            let (tx, rx) = mpsc::channel(8);
            bm.add(Arc::new(PeerConnection::new((*id).into(), tx))).await;
            receivers.push(rx);
        }
        (bm, receivers)
    }

    fn responder(files: &[(&str, &str)]) -> (tempfile::TempDir, FixtureResponder) {
        let dir = tempfile::tempdir().unwrap();
        for (name, body) in files {
            std::fs::write(dir.path().join(name), body).unwrap();
        }
        let responder = FixtureResponder::new(FixtureStore::new(dir.path()));
        (dir, responder)
    }

    #[tokio::test]
    async fn get_data_replies_to_requester_only() {
        let (_dir, responder) = responder(&[("line.json", r#"{"points":[1,2]}"#)]);
        let (bm, mut rx) = setup(&["a", "b"]).await;

        responder
            .handle("a", Envelope::request("trend", "line"), &bm)
            .await;

        let frame = rx[0].recv().await.unwrap();
        let reply = Envelope::decode(&frame).unwrap();
        assert_eq!(reply.category, "trend");
        assert_matches!(
            reply.into_delivery().unwrap(),
            Some(Delivery::GetData(value)) => assert_eq!(value, json!({"points": [1, 2]}))
        );
        assert!(rx[1].try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_fixture_replies_not_found() {
        let (_dir, responder) = responder(&[]);
        let (bm, mut rx) = setup(&["a"]).await;

        responder
            .handle("a", Envelope::request("trend", "nope"), &bm)
            .await;

        let reply = Envelope::decode(&rx[0].recv().await.unwrap()).unwrap();
        assert_matches!(
            reply.into_delivery().unwrap(),
            Some(Delivery::GetData(value)) => assert_eq!(value["status"], 404)
        );
    }

    #[tokio::test]
    async fn get_data_without_chart_name_is_ignored() {
        let (_dir, responder) = responder(&[]);
        let (bm, mut rx) = setup(&["a"]).await;
        responder
            .handle("a", Envelope::new("trend", Action::GetData, json!(null)), &bm)
            .await;
        assert!(rx[0].try_recv().is_err());
    }

    #[tokio::test]
    async fn full_screen_and_theme_change_are_relayed() {
        let (_dir, responder) = responder(&[]);
        let (bm, mut rx) = setup(&["a", "b"]).await;

        let full = Envelope::new("panel", Action::FullScreen, json!({"chartName": "map", "value": true}));
        responder.handle("a", full.clone(), &bm).await;
        let theme = Envelope::new("theme", Action::ThemeChange, json!("dark"));
        responder.handle("b", theme.clone(), &bm).await;

        for receiver in &mut rx {
            assert_eq!(Envelope::decode(&receiver.recv().await.unwrap()).unwrap(), full);
            assert_eq!(Envelope::decode(&receiver.recv().await.unwrap()).unwrap(), theme);
        }
    }

    #[tokio::test]
    async fn unknown_action_is_ignored() {
        let (_dir, responder) = responder(&[]);
        let (bm, mut rx) = setup(&["a"]).await;
        responder
            .handle("a", Envelope::new("x", Action::from("ping"), json!(null)), &bm)
            .await;
        assert!(rx[0].try_recv().is_err());
    }

    #[tokio::test]
    async fn log_only_never_replies() {
        let (bm, mut rx) = setup(&["a"]).await;
        LogOnly
            .handle("a", Envelope::request("trend", "line"), &bm)
            .await;
        assert!(rx[0].try_recv().is_err());
    }
}
