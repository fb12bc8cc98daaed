//! `DashboardServer`: the fixture HTTP API and the push endpoint, bound and
//! shut down together.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use vision_settings::ServerSettings;

use crate::error::ServerError;
use crate::fixtures::{self, FixtureStore};
use crate::health::{self, HealthResponse};
use crate::push::endpoint::{self, PushConfig, PushState};
use crate::push::{BroadcastManager, FixtureResponder, FrameHandler};
use crate::shutdown::ShutdownCoordinator;

#[derive(Clone)]
struct HealthState {
    broadcast: Arc<BroadcastManager>,
    start_time: Instant,
}

/// The dashboard backend.
pub struct DashboardServer {
    settings: ServerSettings,
    handler: Arc<dyn FrameHandler>,
    broadcast: Arc<BroadcastManager>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl DashboardServer {
    /// Create a server that hands inbound push frames to `handler`.
    pub fn new(settings: ServerSettings, handler: Arc<dyn FrameHandler>) -> Self {
        Self {
            settings,
            handler,
            broadcast: Arc::new(BroadcastManager::new()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Create a server that answers push data requests from the fixture
    /// directory.
    pub fn with_fixture_responder(settings: ServerSettings) -> Self {
        let store = FixtureStore::new(&settings.data_dir);
        Self::new(settings, Arc::new(FixtureResponder::new(store)))
    }

    /// HTTP router: `/health` plus the fixture API.
    pub fn http_router(&self) -> Router {
        let state = HealthState {
            broadcast: Arc::clone(&self.broadcast),
            start_time: self.start_time,
        };
        let store = FixtureStore::new(&self.settings.data_dir);
        let router = Router::new()
            .route("/health", get(health_handler))
            .with_state(state)
            .merge(fixtures::router(store, &self.settings.api_prefix));
        fixtures::layered(router).layer(TraceLayer::new_for_http())
    }

    /// Push router: WebSocket upgrade at `/`.
    pub fn push_router(&self) -> Router {
        endpoint::router(PushState {
            broadcast: Arc::clone(&self.broadcast),
            handler: Arc::clone(&self.handler),
            config: self.push_config(),
            shutdown: self.shutdown.token(),
        })
    }

    /// Connected push peers.
    pub fn broadcast(&self) -> &Arc<BroadcastManager> {
        &self.broadcast
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server settings.
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    fn push_config(&self) -> PushConfig {
        PushConfig {
            send_welcome: self.settings.send_welcome,
            max_send_queue: self.settings.max_send_queue,
            heartbeat_interval: Duration::from_secs(self.settings.heartbeat_interval_secs.max(1)),
        }
    }

    /// Bind both listeners and start serving. Port `0` picks a free port;
    /// the bound addresses are on the returned handle.
    pub async fn listen(self) -> Result<ServerHandle, ServerError> {
        let host = self.settings.host.as_str();
        let http_listener = bind(host, self.settings.http_port).await?;
        let push_listener = bind(host, self.settings.push_port).await?;
        let http_addr = http_listener.local_addr()?;
        let push_addr = push_listener.local_addr()?;

        let http = spawn_serve("http", http_listener, self.http_router(), &self.shutdown);
        let push = spawn_serve("push", push_listener, self.push_router(), &self.shutdown);

        info!(%http_addr, %push_addr, data_dir = %self.settings.data_dir, "dashboard server started");

        Ok(ServerHandle {
            http_addr,
            push_addr,
            broadcast: self.broadcast,
            shutdown: self.shutdown,
            tasks: vec![http, push],
        })
    }
}

async fn bind(host: &str, port: u16) -> Result<TcpListener, ServerError> {
    TcpListener::bind((host, port))
        .await
        .map_err(|source| ServerError::Bind {
            addr: format!("{host}:{port}"),
            source,
        })
}

fn spawn_serve(
    name: &'static str,
    listener: TcpListener,
    router: Router,
    shutdown: &ShutdownCoordinator,
) -> JoinHandle<()> {
    let token = shutdown.token();
    tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;
        if let Err(e) = result {
            error!(listener = name, error = %e, "server exited with error");
        }
    })
}

/// Running server.
pub struct ServerHandle {
    /// Bound fixture API address.
    pub http_addr: SocketAddr,
    /// Bound push endpoint address.
    pub push_addr: SocketAddr,
    broadcast: Arc<BroadcastManager>,
    shutdown: Arc<ShutdownCoordinator>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// `ws://` URL of the push endpoint.
    pub fn push_url(&self) -> String {
        format!("ws://{}", self.push_addr)
    }

    /// `http://` base URL of the fixture API.
    pub fn http_url(&self) -> String {
        format!("http://{}", self.http_addr)
    }

    /// Connected push peers.
    pub fn broadcast(&self) -> &Arc<BroadcastManager> {
        &self.broadcast
    }

    /// Stop accepting, close every push socket and wait for both listeners.
    pub async fn shutdown(self) {
        self.shutdown.graceful_shutdown(self.tasks, None).await;
        info!("dashboard server stopped");
    }
}

/// GET /health
async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    let connections = state.broadcast.connection_count().await;
    Json(health::health_check(state.start_time, connections))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::LogOnly;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn make_server() -> DashboardServer {
        DashboardServer::new(ServerSettings::default(), Arc::new(LogOnly))
    }

    #[test]
    fn default_settings_are_kept() {
        let server = make_server();
        assert_eq!(server.settings().http_port, 8888);
        assert_eq!(server.settings().push_port, 9998);
        assert!(!server.shutdown().is_shutting_down());
    }

    #[test]
    fn push_config_from_settings() {
        let settings = ServerSettings {
            send_welcome: false,
            max_send_queue: 4,
            heartbeat_interval_secs: 0,
            ..ServerSettings::default()
        };
        let server = DashboardServer::new(settings, Arc::new(LogOnly));
        let config = server.push_config();
        assert!(!config.send_welcome);
        assert_eq!(config.max_send_queue, 4);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = make_server().http_router();
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key(fixtures::X_RESPONSE_TIME));
        let body = axum::body::to_bytes(resp.into_body(), 10_000)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert!(parsed["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn unknown_path_falls_through_to_fixtures() {
        let app = make_server().http_router();
        let req = Request::builder()
            .uri("/api/does-not-exist")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 10_000)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], 404);
    }

    #[tokio::test]
    async fn listen_on_ephemeral_ports() {
        let settings = ServerSettings {
            http_port: 0,
            push_port: 0,
            ..ServerSettings::default()
        };
        let handle = DashboardServer::new(settings, Arc::new(LogOnly))
            .listen()
            .await
            .unwrap();
        assert_ne!(handle.http_addr.port(), 0);
        assert_ne!(handle.push_addr.port(), 0);
        assert_ne!(handle.http_addr, handle.push_addr);
        assert!(handle.push_url().starts_with("ws://127.0.0.1:"));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let settings = ServerSettings {
            http_port: taken.local_addr().unwrap().port(),
            push_port: 0,
            ..ServerSettings::default()
        };
        let result = DashboardServer::new(settings, Arc::new(LogOnly)).listen().await;
        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }
}
