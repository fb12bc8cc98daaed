//! # vision-server
//!
//! Server side of the dashboard:
//!
//! - [`push`]: WebSocket push endpoint with per-peer outbound queues,
//!   broadcast fan-out and a pluggable [`push::FrameHandler`]
//! - [`fixtures`]: static JSON fixture API with permissive CORS
//! - [`server::DashboardServer`]: binds both listeners and shuts them down
//!   together

#![deny(unsafe_code)]

pub mod error;
pub mod fixtures;
pub mod health;
pub mod push;
pub mod server;
pub mod shutdown;

pub use error::{FixtureError, ServerError};
pub use fixtures::FixtureStore;
pub use push::{BroadcastManager, FixtureResponder, FrameHandler, LogOnly, PeerConnection};
pub use server::{DashboardServer, ServerHandle};
pub use shutdown::ShutdownCoordinator;
