//! # vision-core
//!
//! Shared vocabulary for the vision dashboard push channel.
//!
//! - **Envelope**: the wire unit exchanged over the channel (`socketType`,
//!   `action`, `data`) and its two-step decode into a typed [`Delivery`]
//! - **Retry**: linear-backoff [`RetryPolicy`] and the connect/send
//!   [`RetryState`] counters
//! - **Logging**: `tracing` subscriber bootstrap and in-memory log capture
//!   for tests

#![deny(unsafe_code)]

pub mod envelope;
pub mod logging;
pub mod retry;

pub use envelope::{Action, Delivery, Envelope, EnvelopeError};
pub use retry::{ReconnectDecision, RetryPolicy, RetryState};
