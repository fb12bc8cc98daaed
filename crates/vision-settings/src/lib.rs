//! # vision-settings
//!
//! Configuration for the vision dashboard, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`VisionSettings::default()`]
//! 2. **User file**: `~/.vision/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `VISION_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::{ClientSettings, LoggingSettings, ServerSettings, VisionSettings};
