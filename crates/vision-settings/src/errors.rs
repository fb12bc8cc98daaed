//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when loading the settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read settings file {}: {source}", path.display())]
    Io {
        /// Settings file that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The settings file is not valid JSON, or does not fit the settings
    /// schema once merged over the defaults.
    #[error("invalid settings in {}: {source}", path.display())]
    Json {
        /// Settings file that was being parsed.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_json::Error,
    },
}

impl SettingsError {
    /// The settings file the error refers to.
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::Io { path, .. } | Self::Json { path, .. } => path,
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
