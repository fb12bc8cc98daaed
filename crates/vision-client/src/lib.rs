//! # vision-client
//!
//! Client side of the dashboard push channel.
//!
//! - [`ConnectionManager`]: owns exactly one channel at a time, reconnects
//!   with linear backoff, retries failed sends, and dispatches inbound
//!   envelopes to the single handler registered per category
//! - [`Connector`]: the transport seam; [`WebSocketConnector`] is the
//!   `tokio-tungstenite` implementation
//! - [`Subscription`]: registers a handler for as long as it is alive
//!
//! All channel events, timers and API calls are processed one at a time by a
//! single actor task, so handlers never run concurrently with each other or
//! with registry updates.

#![deny(unsafe_code)]

pub mod error;
pub mod manager;
pub mod registry;
pub mod state;
pub mod subscription;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use error::ChannelError;
pub use manager::{ClientConfig, ConnectionManager};
pub use registry::{DispatchOutcome, Handler, HandlerRegistry};
pub use state::{ChannelState, ChannelStatus};
pub use subscription::Subscription;
pub use transport::{Channel, Connector, FrameSink, FrameStream, WebSocketConnector};
