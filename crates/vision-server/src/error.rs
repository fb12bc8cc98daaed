//! Server error types.

use thiserror::Error;

/// Failures resolving or reading a fixture.
#[derive(Debug, Error)]
pub enum FixtureError {
    /// The resource name contains characters outside `[A-Za-z0-9_-]` or an
    /// empty segment.
    #[error("invalid resource name: {0:?}")]
    InvalidName(String),
    /// The fixture file could not be read.
    #[error("fixture {resource:?} could not be read: {source}")]
    Unreadable {
        /// Requested resource.
        resource: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Failures starting the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// `host:port` that failed.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Other I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
