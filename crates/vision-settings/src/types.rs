//! Settings types.

use serde::{Deserialize, Serialize};
use vision_core::RetryPolicy;
use vision_core::logging::LogFormat;

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VisionSettings {
    /// Push-channel client settings.
    pub client: ClientSettings,
    /// Fixture API and push endpoint settings.
    pub server: ServerSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Push-channel client settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Channel endpoint address.
    pub address: String,
    /// Reconnect and send-retry backoff.
    pub retry: RetryPolicy,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            address: "ws://localhost:9998".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Fixture API and push endpoint settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address for both listeners.
    pub host: String,
    /// Fixture HTTP API port (`0` auto-assigns).
    pub http_port: u16,
    /// Push endpoint port (`0` auto-assigns).
    pub push_port: u16,
    /// Directory holding `<resource>.json` fixtures.
    pub data_dir: String,
    /// Path prefix of the fixture API.
    pub api_prefix: String,
    /// Push a welcome envelope to each new connection.
    pub send_welcome: bool,
    /// Per-connection outbound queue capacity.
    pub max_send_queue: usize,
    /// Interval between WebSocket pings, in seconds.
    pub heartbeat_interval_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            http_port: 8888,
            push_port: 9998,
            data_dir: "data".to_string(),
            api_prefix: "/api".to_string(),
            send_welcome: true,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_dashboard_ports() {
        let settings = VisionSettings::default();
        assert_eq!(settings.client.address, "ws://localhost:9998");
        assert_eq!(settings.server.http_port, 8888);
        assert_eq!(settings.server.push_port, 9998);
        assert_eq!(settings.server.api_prefix, "/api");
        assert_eq!(settings.client.retry.step_ms, 500);
        assert_eq!(settings.client.retry.max_connect_retries, 20);
        assert_eq!(settings.logging.format, LogFormat::Compact);
    }

    #[test]
    fn camel_case_keys() {
        let json = serde_json::to_value(VisionSettings::default()).unwrap();
        assert!(json["server"].get("httpPort").is_some());
        assert!(json["server"].get("pushPort").is_some());
        assert!(json["client"]["retry"].get("maxConnectRetries").is_some());
    }

    #[test]
    fn partial_object_fills_defaults() {
        let settings: VisionSettings =
            serde_json::from_str(r#"{"server":{"pushPort":7000}}"#).unwrap();
        assert_eq!(settings.server.push_port, 7000);
        assert_eq!(settings.server.http_port, 8888);
        assert_eq!(settings.client.address, "ws://localhost:9998");
    }
}
