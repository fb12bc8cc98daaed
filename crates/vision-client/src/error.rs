//! Channel-layer errors.
//!
//! None of these reach application code: connect failures feed the
//! reconnect policy, write failures feed the send-retry policy.

use thiserror::Error;

use crate::state::ChannelState;

/// Failures inside the channel layer.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The runtime has no channel transport.
    #[error("channel transport is not supported in this environment")]
    Unsupported,
    /// The transport could not be opened.
    #[error("failed to open channel to {address}: {reason}")]
    Connect {
        /// Endpoint address.
        address: String,
        /// Transport-level reason.
        reason: String,
    },
    /// A write was attempted without an open channel.
    #[error("channel is not open (state: {0})")]
    NotOpen(ChannelState),
    /// The outbound queue of the open channel is full.
    #[error("channel send queue is full ({0} frames pending)")]
    QueueFull(usize),
    /// The transport rejected a write, or did not finish it in time.
    #[error("channel write failed: {0}")]
    Write(String),
    /// The transport failed while reading.
    #[error("channel read failed: {0}")]
    Read(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = ChannelError::Connect {
            address: "ws://localhost:9998".into(),
            reason: "refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to open channel to ws://localhost:9998: refused"
        );
        assert_eq!(
            ChannelError::NotOpen(ChannelState::Connecting).to_string(),
            "channel is not open (state: connecting)"
        );
        assert_eq!(
            ChannelError::QueueFull(64).to_string(),
            "channel send queue is full (64 frames pending)"
        );
    }
}
