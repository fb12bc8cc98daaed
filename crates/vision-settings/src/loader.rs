//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`VisionSettings::default()`]
//! 2. If `~/.vision/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `VISION_*` environment variable overrides
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;
use vision_core::logging::LogFormat;

use crate::errors::{Result, SettingsError};
use crate::types::VisionSettings;

/// Resolve the path to the settings file (`~/.vision/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".vision").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<VisionSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<VisionSettings> {
    let json_err = |source| SettingsError::Json {
        path: path.to_path_buf(),
        source,
    };
    let defaults = serde_json::to_value(VisionSettings::default()).map_err(json_err)?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(json_err)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: VisionSettings = serde_json::from_value(merged).map_err(json_err)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut VisionSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply `VISION_*` overrides read through `lookup`.
///
/// Empty values are treated as unset. Values that fail to parse or fall out
/// of range are ignored with a warning.
pub fn apply_overrides<F>(settings: &mut VisionSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("VISION_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("VISION_HTTP_PORT", 0, 65535) {
        settings.server.http_port = v;
    }
    if let Some(v) = env.u16("VISION_PUSH_PORT", 0, 65535) {
        settings.server.push_port = v;
    }
    if let Some(v) = env.string("VISION_DATA_DIR") {
        settings.server.data_dir = v;
    }

    // ── Client ──────────────────────────────────────────────────────
    if let Some(v) = env.string("VISION_CHANNEL_ADDRESS") {
        settings.client.address = v;
    }
    if let Some(v) = env.u64("VISION_RETRY_STEP_MS", 1, 600_000) {
        settings.client.retry.step_ms = v;
    }
    if let Some(v) = env.u32("VISION_MAX_CONNECT_RETRIES", 1, 10_000) {
        settings.client.retry.max_connect_retries = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("VISION_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.string("VISION_LOG_FORMAT") {
        match v.parse::<LogFormat>() {
            Ok(format) => settings.logging.format = format,
            Err(_) => tracing::warn!(key = "VISION_LOG_FORMAT", value = %v, "invalid log format, ignoring"),
        }
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid numeric env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, |v| parse_u16_range(v, min, max))
    }

    fn u32(&self, name: &str, min: u32, max: u32) -> Option<u32> {
        self.parsed(name, |v| parse_u32_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, |v| parse_u64_range(v, min, max))
    }
}
