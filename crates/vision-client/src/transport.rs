//! Transport seam between the connection manager and the network.

use std::pin::Pin;

use async_trait::async_trait;
use futures::future::ready;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::error::ChannelError;

/// Outbound half of a channel: accepts text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = ChannelError> + Send>>;

/// Inbound half of a channel: yields text frames until the peer closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, ChannelError>> + Send>>;

/// An open, bidirectional text channel.
pub struct Channel {
    /// Write half.
    pub sink: FrameSink,
    /// Read half. Ends when the channel closes.
    pub stream: FrameStream,
}

impl Channel {
    /// Box a sink/stream pair into a channel.
    pub fn new<S, St>(sink: S, stream: St) -> Self
    where
        S: Sink<String, Error = ChannelError> + Send + 'static,
        St: Stream<Item = Result<String, ChannelError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").finish_non_exhaustive()
    }
}

/// Opens channels to an address.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Whether this environment can open channels at all. When `false` the
    /// manager never leaves `Idle`.
    fn supports_channels(&self) -> bool {
        true
    }

    /// Open a channel to `address`.
    async fn connect(&self, address: &str) -> Result<Channel, ChannelError>;
}

/// WebSocket transport over `tokio-tungstenite`. Only text frames are
/// surfaced; pings, pongs and binary frames are dropped.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, address: &str) -> Result<Channel, ChannelError> {
        let (ws, _response) = connect_async(address)
            .await
            .map_err(|e| ChannelError::Connect {
                address: address.to_owned(),
                reason: e.to_string(),
            })?;
        debug!(address, "websocket handshake complete");

        let (write, read) = ws.split();
        let sink = write
            .sink_map_err(|e| ChannelError::Write(e.to_string()))
            .with(|text: String| ready(Ok::<_, ChannelError>(Message::text(text))));
        let stream = read.filter_map(|msg| {
            ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(_) => None,
                Err(e) => Some(Err(ChannelError::Read(e.to_string()))),
            })
        });
        Ok(Channel::new(sink, stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn websocket_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = WebSocketConnector
            .connect(&format!("ws://127.0.0.1:{port}"))
            .await;
        assert!(matches!(result, Err(ChannelError::Connect { .. })));
    }

    #[tokio::test]
    async fn websocket_invalid_address() {
        let result = WebSocketConnector.connect("not a url").await;
        assert!(matches!(result, Err(ChannelError::Connect { .. })));
    }

    #[test]
    fn websocket_supports_channels() {
        assert!(WebSocketConnector.supports_channels());
    }
}
