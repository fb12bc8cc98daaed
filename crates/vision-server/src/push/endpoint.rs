//! WebSocket upgrade and per-socket reader/writer tasks.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use vision_core::{Action, Envelope};

use super::broadcast::BroadcastManager;
use super::connection::PeerConnection;
use super::handler::FrameHandler;

/// Category and action of the greeting pushed to new peers.
pub const WELCOME: &str = "welcome";

/// Peers that have not answered a ping for this many heartbeat intervals are
/// disconnected.
const MISSED_PONG_LIMIT: u32 = 3;

/// Push endpoint tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PushConfig {
    /// Push a welcome envelope on connect.
    pub send_welcome: bool,
    /// Outbound queue capacity per peer.
    pub max_send_queue: usize,
    /// Ping interval.
    pub heartbeat_interval: Duration,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            send_welcome: true,
            max_send_queue: 256,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// State shared by every push socket.
#[derive(Clone)]
pub struct PushState {
    /// Connected peers.
    pub broadcast: Arc<BroadcastManager>,
    /// Inbound frame handler.
    pub handler: Arc<dyn FrameHandler>,
    /// Tuning.
    pub config: PushConfig,
    /// Cancelled on server shutdown; closes every socket.
    pub shutdown: CancellationToken,
}

/// Router accepting WebSocket upgrades at `/`.
pub fn router(state: PushState) -> Router {
    Router::new().route("/", get(ws_handler)).with_state(state)
}

/// Greeting sent to a new peer. Clients ignore the unknown action.
pub fn welcome_envelope(conn: &PeerConnection) -> Envelope {
    Envelope::new(
        WELCOME,
        Action::from(WELCOME),
        json!({
            "connId": conn.id,
            "connectedAt": conn.connected_at_utc.to_rfc3339(),
        }),
    )
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<PushState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: PushState) {
    let (tx, rx) = mpsc::channel(state.config.max_send_queue.max(1));
    let conn = Arc::new(PeerConnection::new(PeerConnection::generate_id(), tx));
    state.broadcast.add(Arc::clone(&conn)).await;
    info!(conn_id = %conn.id, "peer connected");

    if state.config.send_welcome && !conn.send_envelope(&welcome_envelope(&conn)) {
        warn!(conn_id = %conn.id, "failed to queue welcome");
    }

    let (ws_tx, ws_rx) = socket.split();
    let mut writer = tokio::spawn(write_loop(
        ws_tx,
        rx,
        Arc::clone(&conn),
        state.config.heartbeat_interval,
    ));
    let mut reader = tokio::spawn(read_loop(ws_rx, Arc::clone(&conn), state.clone()));

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
        () = state.shutdown.cancelled() => {
            debug!(conn_id = %conn.id, "closing socket for shutdown");
            reader.abort();
            writer.abort();
        }
    }

    let _ = state.broadcast.remove(&conn.id).await;
    info!(
        conn_id = %conn.id,
        age_secs = conn.age().as_secs(),
        dropped = conn.drop_count(),
        "peer disconnected"
    );
}

async fn write_loop(
    mut ws_tx: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Arc<String>>,
    conn: Arc<PeerConnection>,
    heartbeat: Duration,
) {
    let mut ping_interval = tokio::time::interval(heartbeat.max(Duration::from_millis(1)));
    let _ = ping_interval.tick().await;
    let limit = heartbeat * MISSED_PONG_LIMIT;

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                if ws_tx.send(Message::Text(String::clone(&frame).into())).await.is_err() {
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if conn.last_pong_elapsed() > limit {
                    warn!(conn_id = %conn.id, "peer stopped answering pings");
                    break;
                }
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                trace!(conn_id = %conn.id, "sent ping");
            }
        }
    }
    let _ = ws_tx.close().await;
}

async fn read_loop(
    mut ws_rx: futures::stream::SplitStream<WebSocket>,
    conn: Arc<PeerConnection>,
    state: PushState,
) {
    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            Message::Text(text) => match Envelope::decode(text.as_str()) {
                Ok(envelope) => {
                    trace!(
                        conn_id = %conn.id,
                        category = %envelope.category,
                        action = %envelope.action,
                        "frame received"
                    );
                    state
                        .handler
                        .handle(&conn.id, envelope, &state.broadcast)
                        .await;
                }
                Err(e) => warn!(conn_id = %conn.id, error = %e, "malformed frame dropped"),
            },
            Message::Pong(_) => conn.mark_alive(),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Binary(_) => {}
        }
    }
}
