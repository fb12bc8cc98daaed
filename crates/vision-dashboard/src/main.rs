//! # vision-dashboard
//!
//! - `serve`: fixture HTTP API plus push endpoint
//! - `listen`: connect to a push endpoint and log what arrives for the given
//!   categories

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use vision_client::{ClientConfig, ConnectionManager, Subscription};
use vision_core::logging::init_subscriber;
use vision_core::{Delivery, Envelope};
use vision_server::DashboardServer;
use vision_settings::{ClientSettings, ServerSettings, load_settings_from_path, settings_path};

/// Dashboard push server and client.
#[derive(Parser, Debug)]
#[command(name = "vision-dashboard", about = "Dashboard push server and client")]
struct Cli {
    /// Settings file (default: `~/.vision/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log filter, overrides the settings file (e.g. `debug`, `vision_client=trace`).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the fixture API and the push endpoint.
    Serve(ServeArgs),
    /// Connect to a push endpoint and log deliveries.
    Listen(ListenArgs),
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Fixture API port (0 for auto-assign).
    #[arg(long)]
    http_port: Option<u16>,

    /// Push endpoint port (0 for auto-assign).
    #[arg(long)]
    push_port: Option<u16>,

    /// Directory of `<resource>.json` fixtures.
    #[arg(long)]
    data_dir: Option<String>,

    /// Do not greet new push peers.
    #[arg(long)]
    no_welcome: bool,
}

impl ServeArgs {
    fn apply(&self, settings: &mut ServerSettings) {
        if let Some(host) = &self.host {
            settings.host.clone_from(host);
        }
        if let Some(port) = self.http_port {
            settings.http_port = port;
        }
        if let Some(port) = self.push_port {
            settings.push_port = port;
        }
        if let Some(dir) = &self.data_dir {
            settings.data_dir.clone_from(dir);
        }
        if self.no_welcome {
            settings.send_welcome = false;
        }
    }
}

#[derive(Args, Debug)]
struct ListenArgs {
    /// Push endpoint address.
    #[arg(long)]
    address: Option<String>,

    /// Send a `getData` request per category (chart name = category).
    #[arg(long)]
    request: bool,

    /// Categories to register handlers for.
    #[arg(required = true)]
    categories: Vec<String>,
}

impl ListenArgs {
    fn client_config(&self, settings: &ClientSettings) -> ClientConfig {
        let address = self.address.as_deref().unwrap_or(&settings.address);
        ClientConfig::new(address).with_retry(settings.retry)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli.settings.clone().unwrap_or_else(settings_path);
    let settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;

    let level = cli.log_level.as_deref().unwrap_or(&settings.logging.level);
    init_subscriber(level, settings.logging.format);

    match cli.command {
        Command::Serve(args) => {
            let mut server = settings.server;
            args.apply(&mut server);
            serve(server).await
        }
        Command::Listen(args) => listen(&args, &settings.client).await,
    }
}

async fn serve(settings: ServerSettings) -> Result<()> {
    let handle = DashboardServer::with_fixture_responder(settings)
        .listen()
        .await
        .context("Failed to start dashboard server")?;
    info!(http = %handle.http_url(), push = %handle.push_url(), "listening");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

async fn listen(args: &ListenArgs, settings: &ClientSettings) -> Result<()> {
    let config = args.client_config(settings);
    info!(address = %config.address, categories = ?args.categories, "connecting");
    let manager = ConnectionManager::websocket(config);

    let subscriptions: Vec<Subscription> = args
        .categories
        .iter()
        .map(|category| {
            let label = category.clone();
            manager.subscribe(category.as_str(), move |delivery| log_delivery(&label, &delivery))
        })
        .collect();

    manager.connect();
    if args.request {
        for category in &args.categories {
            manager.send_envelope(&Envelope::request(category.as_str(), category.as_str()));
        }
    }

    let mut status = manager.watch_status();
    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                info!(
                    state = %current.state,
                    connect_retries = current.connect_retry_count,
                    send_retries = current.send_retry_count,
                    "channel status"
                );
                if current.gave_up {
                    warn!("reconnect attempts exhausted, waiting for ctrl-c");
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for ctrl-c")?;
                break;
            }
        }
    }

    drop(subscriptions);
    manager.shutdown();
    Ok(())
}

fn log_delivery(category: &str, delivery: &Delivery) {
    match delivery {
        Delivery::GetData(value) => info!(category, payload = %value, "getData"),
        Delivery::FullScreen(envelope) => info!(
            category,
            chart = ?envelope.chart_name(),
            data = %envelope.data,
            "fullScreen"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vision_core::RetryPolicy;

    #[test]
    fn serve_defaults() {
        let cli = Cli::parse_from(["vision-dashboard", "serve"]);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        let mut settings = ServerSettings::default();
        args.apply(&mut settings);
        assert_eq!(settings.host, "127.0.0.1");
        assert_eq!(settings.http_port, 8888);
        assert_eq!(settings.push_port, 9998);
        assert!(settings.send_welcome);
    }

    #[test]
    fn serve_flags_override_settings() {
        let cli = Cli::parse_from([
            "vision-dashboard",
            "serve",
            "--host",
            "0.0.0.0",
            "--http-port",
            "8080",
            "--push-port",
            "9000",
            "--data-dir",
            "/srv/fixtures",
            "--no-welcome",
        ]);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        let mut settings = ServerSettings::default();
        args.apply(&mut settings);
        assert_eq!(settings.host, "0.0.0.0");
        assert_eq!(settings.http_port, 8080);
        assert_eq!(settings.push_port, 9000);
        assert_eq!(settings.data_dir, "/srv/fixtures");
        assert!(!settings.send_welcome);
    }

    #[test]
    fn listen_requires_a_category() {
        assert!(Cli::try_parse_from(["vision-dashboard", "listen"]).is_err());
    }

    #[test]
    fn listen_config_uses_settings_then_flag() {
        let settings = ClientSettings {
            address: "ws://dash:9998".into(),
            retry: RetryPolicy {
                step_ms: 100,
                max_connect_retries: 3,
            },
        };

        let cli = Cli::parse_from(["vision-dashboard", "listen", "trend", "map"]);
        let Command::Listen(args) = cli.command else {
            panic!("expected listen");
        };
        assert_eq!(args.categories, vec!["trend", "map"]);
        let config = args.client_config(&settings);
        assert_eq!(config.address, "ws://dash:9998");
        assert_eq!(config.retry, settings.retry);

        let cli = Cli::parse_from([
            "vision-dashboard",
            "listen",
            "--address",
            "ws://other:1",
            "--request",
            "trend",
        ]);
        let Command::Listen(args) = cli.command else {
            panic!("expected listen");
        };
        assert!(args.request);
        assert_eq!(args.client_config(&settings).address, "ws://other:1");
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "vision-dashboard",
            "serve",
            "--settings",
            "/tmp/vision.json",
            "--log-level",
            "debug",
        ]);
        assert_eq!(cli.settings, Some(PathBuf::from("/tmp/vision.json")));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn settings_file_feeds_server_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server":{"pushPort":7000,"dataDir":"fixtures"}}"#).unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        let mut server = settings.server;
        ServeArgs {
            push_port: Some(7100),
            ..ServeArgs::default()
        }
        .apply(&mut server);
        assert_eq!(server.push_port, 7100);
        assert_eq!(server.data_dir, "fixtures");
    }
}
