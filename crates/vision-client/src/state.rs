//! Channel lifecycle states and the observable status snapshot.

use std::fmt;

/// Lifecycle of the single channel owned by the manager.
///
/// `Idle → Connecting → Open → Closed`, with `Closed → Connecting` as the
/// reconnect edge. A failed open goes straight from `Connecting` to
/// `Closed`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Never connected.
    #[default]
    Idle,
    /// An open is in flight.
    Connecting,
    /// The channel is usable.
    Open,
    /// The last channel failed to open or was closed by the peer.
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
        })
    }
}

/// Point-in-time view of the manager, published after every transition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelStatus {
    /// Current lifecycle state.
    pub state: ChannelState,
    /// Consecutive closes since the last successful open.
    pub connect_retry_count: u32,
    /// Consecutive failed sends since the last successful send.
    pub send_retry_count: u32,
    /// The reconnect ceiling was hit; no automatic reconnects remain.
    pub gave_up: bool,
    /// Number of registered handlers.
    pub handlers: usize,
}

impl ChannelStatus {
    /// Whether the channel is open.
    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }
}
