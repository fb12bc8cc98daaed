//! In-memory connector for exercising the manager without sockets.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Sink;
use futures::channel::mpsc as fmpsc;
use tokio::sync::mpsc;

use crate::error::ChannelError;
use crate::transport::{Channel, Connector};

/// Server side of one accepted mock channel. Dropping it closes the channel.
pub(crate) struct MockPeer {
    to_client: fmpsc::UnboundedSender<Result<String, ChannelError>>,
    from_client: fmpsc::UnboundedReceiver<String>,
}

impl MockPeer {
    pub(crate) fn push(&self, frame: &str) {
        self.to_client
            .unbounded_send(Ok(frame.to_owned()))
            .expect("client stream dropped");
    }

    pub(crate) async fn recv(&mut self) -> Option<String> {
        use futures::StreamExt;
        self.from_client.next().await
    }
}

/// How the client's write half of a mock channel behaves.
#[derive(Clone, Copy)]
enum Writes {
    Accept,
    /// Reject the first `n` writes on each channel.
    Reject(usize),
    /// Never become ready.
    Stall,
}

/// Write half handed to the manager.
struct MockSink {
    to_peer: fmpsc::UnboundedSender<String>,
    rejections_left: usize,
    stalled: bool,
}

impl Sink<String> for MockSink {
    type Error = ChannelError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.stalled {
            Poll::Pending
        } else {
            Poll::Ready(Ok(()))
        }
    }

    fn start_send(mut self: Pin<&mut Self>, frame: String) -> Result<(), Self::Error> {
        if self.rejections_left > 0 {
            self.rejections_left -= 1;
            return Err(ChannelError::Write("rejected by mock peer".into()));
        }
        self.to_peer
            .unbounded_send(frame)
            .map_err(|e| ChannelError::Write(e.to_string()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.stalled {
            Poll::Pending
        } else {
            Poll::Ready(Ok(()))
        }
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.to_peer.close_channel();
        Poll::Ready(Ok(()))
    }
}

pub(crate) struct MockConnector {
    supported: bool,
    refuse_first: usize,
    writes: Writes,
    attempts: AtomicUsize,
    peers_tx: mpsc::UnboundedSender<MockPeer>,
    peers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockPeer>>,
}

impl MockConnector {
    fn build(supported: bool, refuse_first: usize, writes: Writes) -> Arc<Self> {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            supported,
            refuse_first,
            writes,
            attempts: AtomicUsize::new(0),
            peers_tx,
            peers_rx: tokio::sync::Mutex::new(peers_rx),
        })
    }

    pub(crate) fn accepting() -> Arc<Self> {
        Self::build(true, 0, Writes::Accept)
    }

    pub(crate) fn accepting_after(refusals: usize) -> Arc<Self> {
        Self::build(true, refusals, Writes::Accept)
    }

    pub(crate) fn refusing() -> Arc<Self> {
        Self::build(true, usize::MAX, Writes::Accept)
    }

    pub(crate) fn unsupported() -> Arc<Self> {
        Self::build(false, 0, Writes::Accept)
    }

    /// Channels open, but the first `n` writes on each fail.
    pub(crate) fn rejecting_writes(n: usize) -> Arc<Self> {
        Self::build(true, 0, Writes::Reject(n))
    }

    /// Channels open, but writes never complete.
    pub(crate) fn stalled_writes() -> Arc<Self> {
        Self::build(true, 0, Writes::Stall)
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) async fn next_peer(&self) -> MockPeer {
        let mut peers = self.peers_rx.lock().await;
        tokio::time::timeout(std::time::Duration::from_secs(600), peers.recv())
            .await
            .expect("no channel opened")
            .expect("connector dropped")
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn supports_channels(&self) -> bool {
        self.supported
    }

    async fn connect(&self, address: &str) -> Result<Channel, ChannelError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.refuse_first {
            return Err(ChannelError::Connect {
                address: address.to_owned(),
                reason: "connection refused".into(),
            });
        }

        let (to_client, inbound) = fmpsc::unbounded();
        let (to_peer, from_client) = fmpsc::unbounded::<String>();
        let sink = MockSink {
            to_peer,
            rejections_left: match self.writes {
                Writes::Reject(n) => n,
                Writes::Accept | Writes::Stall => 0,
            },
            stalled: matches!(self.writes, Writes::Stall),
        };
        let _ = self.peers_tx.send(MockPeer {
            to_client,
            from_client,
        });
        Ok(Channel::new(sink, inbound))
    }
}
