//! WebSocket push endpoint.

pub mod broadcast;
pub mod connection;
pub mod endpoint;
pub mod handler;

pub use broadcast::BroadcastManager;
pub use connection::PeerConnection;
pub use endpoint::{PushConfig, PushState};
pub use handler::{FixtureResponder, FrameHandler, LogOnly};
