//! Reconnecting connection manager.
//!
//! [`ConnectionManager`] is a cheap, cloneable handle to a single actor task.
//! The actor owns the channel, the retry counters, the handler registry and
//! every pending timer. API calls are queued as commands and channel activity
//! arrives as events; commands are always drained first, so an
//! `unregister_callback` issued before a frame is processed takes effect
//! before that frame is dispatched.
//!
//! Each channel attempt carries a generation number. Events from an earlier
//! generation (a late frame or close from a discarded channel) are ignored.
//!
//! The actor never awaits the transport. Outbound frames go to a per-channel
//! writer task through a bounded queue; the writer reports each outcome back
//! as an event. A full queue or a failed write is a send failure and feeds
//! the send-retry policy. A write that does not finish within
//! [`WRITE_TIMEOUT`] closes the channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use vision_core::{Delivery, Envelope, ReconnectDecision, RetryPolicy, RetryState};

use crate::error::ChannelError;
use crate::registry::{DispatchOutcome, Handler, HandlerRegistry};
use crate::state::{ChannelState, ChannelStatus};
use crate::subscription::Subscription;
use crate::transport::{Channel, Connector, FrameSink, WebSocketConnector};

/// Outbound frames queued per open channel before sends start failing.
pub const SEND_QUEUE_CAPACITY: usize = 64;

/// Longest a single transport write may take before the channel is treated
/// as dead.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection manager configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Push endpoint address.
    pub address: String,
    /// Backoff parameters.
    pub retry: RetryPolicy,
}

impl ClientConfig {
    /// Config for `address` with the default retry policy.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("ws://localhost:9998")
    }
}

enum Command {
    Connect,
    Register { category: String, handler: Handler },
    Unregister { category: String },
    Send { frame: String },
    Shutdown,
}

enum Event {
    Opened { generation: u64, channel: Channel },
    ConnectFailed { generation: u64, error: ChannelError },
    Frame { generation: u64, text: String },
    Closed { generation: u64 },
    Written { bytes: usize },
    WriteFailed { frame: String, error: ChannelError },
    ReconnectDue,
    SendRetryDue { id: u64, frame: String },
}

/// Handle to the connection actor.
///
/// Clones share the same channel and registry. The actor stops when
/// [`shutdown`](Self::shutdown) is called or every handle is dropped.
/// Handlers live inside the actor, so a handler that captures a clone keeps
/// the actor running until `shutdown` is called.
#[derive(Clone, Debug)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ChannelStatus>,
}

impl ConnectionManager {
    /// Start the actor. No connection is attempted until
    /// [`connect`](Self::connect) is called.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ChannelStatus::default());

        let actor = Actor {
            config,
            connector,
            events: events_tx,
            status: status_tx,
            state: ChannelState::Idle,
            retry: RetryState::new(),
            registry: HandlerRegistry::new(),
            gave_up: false,
            generation: 0,
            writer: None,
            writer_task: None,
            connect_task: None,
            reader_task: None,
            reconnect_timer: None,
            send_timers: HashMap::new(),
            next_send_id: 0,
        };
        drop(tokio::spawn(actor.run(commands_rx, events_rx)));

        Self {
            commands: commands_tx,
            status: status_rx,
        }
    }

    /// Start the actor over the WebSocket transport.
    pub fn websocket(config: ClientConfig) -> Self {
        Self::spawn(config, Arc::new(WebSocketConnector))
    }

    /// Open the channel if it is `Idle` or `Closed`. No-op while connecting
    /// or open, and when the transport is unsupported.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Install `handler` for `category`, replacing any previous handler.
    pub fn register_callback<F>(&self, category: impl Into<String>, handler: F)
    where
        F: FnMut(Delivery) + Send + 'static,
    {
        self.command(Command::Register {
            category: category.into(),
            handler: Box::new(handler),
        });
    }

    /// Install a handler whose `getData` payloads are decoded into `T`.
    /// Payloads that do not fit `T` are logged and dropped.
    pub fn register_typed<T, F>(&self, category: impl Into<String>, mut handler: F)
    where
        T: DeserializeOwned,
        F: FnMut(Delivery<T>) + Send + 'static,
    {
        let category = category.into();
        let label = category.clone();
        self.register_callback(category, move |delivery: Delivery| match delivery.typed::<T>() {
            Ok(typed) => handler(typed),
            Err(e) => warn!(category = %label, error = %e, "getData payload does not match handler type, dropping"),
        });
    }

    /// Remove the handler for `category`.
    pub fn unregister_callback(&self, category: impl Into<String>) {
        self.command(Command::Unregister {
            category: category.into(),
        });
    }

    /// Register `handler` for the lifetime of the returned guard.
    pub fn subscribe<F>(&self, category: impl Into<String>, handler: F) -> Subscription
    where
        F: FnMut(Delivery) + Send + 'static,
    {
        let category = category.into();
        self.register_callback(category.clone(), handler);
        Subscription::new(self.clone(), category)
    }

    /// Serialize `data` as JSON and write it to the channel, retrying with
    /// linear backoff until a write succeeds. Values that fail to serialize
    /// are logged and dropped.
    pub fn send<T: Serialize + ?Sized>(&self, data: &T) {
        match serde_json::to_string(data) {
            Ok(frame) => self.command(Command::Send { frame }),
            Err(e) => warn!(error = %e, "failed to serialize outbound payload, dropping"),
        }
    }

    /// Send an envelope.
    pub fn send_envelope(&self, envelope: &Envelope) {
        self.send(envelope);
    }

    /// Current status snapshot.
    pub fn status(&self) -> ChannelStatus {
        *self.status.borrow()
    }

    /// Receiver notified on every status change.
    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.clone()
    }

    /// Wait until the status satisfies `predicate`.
    ///
    /// Returns `None` if the actor has stopped.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Option<ChannelStatus>
    where
        F: FnMut(&ChannelStatus) -> bool,
    {
        let mut rx = self.status.clone();
        rx.wait_for(|s| predicate(s)).await.ok().map(|s| *s)
    }

    /// Stop the actor: pending timers are cancelled and the channel is
    /// dropped.
    pub fn shutdown(&self) {
        self.command(Command::Shutdown);
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("connection manager has stopped, ignoring call");
        }
    }
}

struct Actor {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    events: mpsc::UnboundedSender<Event>,
    status: watch::Sender<ChannelStatus>,
    state: ChannelState,
    retry: RetryState,
    registry: HandlerRegistry,
    gave_up: bool,
    generation: u64,
    writer: Option<mpsc::Sender<String>>,
    writer_task: Option<JoinHandle<()>>,
    connect_task: Option<JoinHandle<()>>,
    reader_task: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    send_timers: HashMap<u64, JoinHandle<()>>,
    next_send_id: u64,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        debug!(address = %self.config.address, "connection manager started");
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = events.recv() => self.handle_event(event),
            }
        }
        self.stop();
        debug!("connection manager stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => {
                self.cancel_reconnect();
                self.connect();
            }
            Command::Register { category, handler } => {
                let replaced = self.registry.register(category.clone(), handler);
                debug!(%category, replaced, "handler registered");
                self.publish();
            }
            Command::Unregister { category } => {
                let removed = self.registry.unregister(&category);
                debug!(%category, removed, "handler unregistered");
                self.publish();
            }
            Command::Send { frame } => self.send(frame),
            Command::Shutdown => {}
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Opened {
                generation,
                channel,
            } => {
                if generation == self.generation {
                    self.on_open(channel);
                } else {
                    trace!(generation, "discarding stale channel");
                }
            }
            Event::ConnectFailed { generation, error } => {
                if generation == self.generation {
                    warn!(address = %self.config.address, %error, "channel failed to open");
                    self.on_close();
                }
            }
            Event::Frame { generation, text } => {
                if generation == self.generation {
                    self.dispatch(&text);
                }
            }
            Event::Closed { generation } => {
                if generation == self.generation && self.state == ChannelState::Open {
                    info!(address = %self.config.address, "channel closed");
                    self.on_close();
                }
            }
            Event::Written { bytes } => {
                self.retry.on_send_ok();
                trace!(bytes, "frame sent");
                self.publish();
            }
            Event::WriteFailed { frame, error } => self.on_send_failed(frame, &error),
            Event::ReconnectDue => {
                self.reconnect_timer = None;
                self.connect();
            }
            Event::SendRetryDue { id, frame } => {
                let _ = self.send_timers.remove(&id);
                self.send(frame);
            }
        }
    }

    fn connect(&mut self) {
        if !self.connector.supports_channels() {
            warn!(error = %ChannelError::Unsupported, "staying idle");
            return;
        }
        match self.state {
            ChannelState::Connecting | ChannelState::Open => {
                trace!(state = %self.state, "connect ignored");
                return;
            }
            ChannelState::Idle | ChannelState::Closed => {}
        }

        self.release_channel();
        self.generation += 1;
        let generation = self.generation;
        self.set_state(ChannelState::Connecting);
        debug!(address = %self.config.address, generation, "opening channel");

        let connector = Arc::clone(&self.connector);
        let address = self.config.address.clone();
        let events = self.events.clone();
        self.connect_task = Some(tokio::spawn(async move {
            let event = match connector.connect(&address).await {
                Ok(channel) => Event::Opened {
                    generation,
                    channel,
                },
                Err(error) => Event::ConnectFailed { generation, error },
            };
            let _ = events.send(event);
        }));
    }

    fn on_open(&mut self, channel: Channel) {
        self.connect_task = None;
        self.retry.on_open();
        self.gave_up = false;

        let Channel { sink, mut stream } = channel;
        let generation = self.generation;
        let (frames_tx, frames_rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        self.writer = Some(frames_tx);
        self.writer_task = Some(tokio::spawn(write_loop(
            sink,
            frames_rx,
            generation,
            self.events.clone(),
        )));

        let events = self.events.clone();
        self.reader_task = Some(tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(text) => {
                        if events.send(Event::Frame { generation, text }).is_err() {
                            return;
                        }
                    }
                    Err(error) => {
                        debug!(%error, "channel read failed");
                        break;
                    }
                }
            }
            let _ = events.send(Event::Closed { generation });
        }));

        info!(address = %self.config.address, "channel open");
        self.set_state(ChannelState::Open);
    }

    fn on_close(&mut self) {
        self.release_channel();
        self.state = ChannelState::Closed;
        match self.retry.on_close(&self.config.retry) {
            ReconnectDecision::Retry { attempt, delay } => {
                info!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "scheduling reconnect"
                );
                self.schedule_reconnect(delay);
            }
            ReconnectDecision::GiveUp { attempts } => {
                error!(attempts, address = %self.config.address, "giving up on reconnecting");
                self.gave_up = true;
            }
        }
        self.publish();
    }

    fn dispatch(&mut self, text: &str) {
        match self.registry.dispatch(text) {
            DispatchOutcome::Delivered { category, action } => {
                trace!(%category, %action, "frame dispatched");
            }
            DispatchOutcome::NoHandler { category } => {
                trace!(%category, "no handler registered, frame dropped");
            }
            DispatchOutcome::Ignored { category, action } => {
                trace!(%category, %action, "action has no handler effect");
            }
            DispatchOutcome::HandlerPanicked { category } => {
                error!(%category, "handler panicked");
            }
            DispatchOutcome::Malformed(e) => {
                warn!(error = %e, "malformed frame dropped");
            }
        }
    }

    /// Hand `frame` to the writer. The outcome arrives later as
    /// `Written` or `WriteFailed`; only a refused hand-off fails here.
    fn send(&mut self, frame: String) {
        if let Err((frame, error)) = self.enqueue(frame) {
            self.on_send_failed(frame, &error);
        }
    }

    fn enqueue(&self, frame: String) -> Result<(), (String, ChannelError)> {
        let writer = match (&self.writer, self.state) {
            (Some(writer), ChannelState::Open) => writer,
            _ => return Err((frame, ChannelError::NotOpen(self.state))),
        };
        writer.try_send(frame).map_err(|e| match e {
            TrySendError::Full(frame) => (frame, ChannelError::QueueFull(SEND_QUEUE_CAPACITY)),
            TrySendError::Closed(frame) => (frame, ChannelError::NotOpen(self.state)),
        })
    }

    fn on_send_failed(&mut self, frame: String, error: &ChannelError) {
        let delay = self.retry.on_send_failed(&self.config.retry);
        warn!(
            %error,
            attempt = self.retry.send_retry_count(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "send failed, retrying"
        );
        self.schedule_send_retry(frame, delay);
        self.publish();
    }

    fn schedule_reconnect(&mut self, delay: Duration) {
        self.cancel_reconnect();
        let events = self.events.clone();
        self.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(Event::ReconnectDue);
        }));
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    fn schedule_send_retry(&mut self, frame: String, delay: Duration) {
        let id = self.next_send_id;
        self.next_send_id += 1;
        let events = self.events.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(Event::SendRetryDue { id, frame });
        });
        let _ = self.send_timers.insert(id, timer);
    }

    fn release_channel(&mut self) {
        self.writer = None;
        if let Some(task) = self.writer_task.take() {
            task.abort();
        }
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
    }

    fn stop(&mut self) {
        self.cancel_reconnect();
        for (_, timer) in self.send_timers.drain() {
            timer.abort();
        }
        self.release_channel();
        self.state = ChannelState::Closed;
        self.publish();
    }

    fn set_state(&mut self, state: ChannelState) {
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        let status = ChannelStatus {
            state: self.state,
            connect_retry_count: self.retry.connect_retry_count(),
            send_retry_count: self.retry.send_retry_count(),
            gave_up: self.gave_up,
            handlers: self.registry.len(),
        };
        let _ = self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

/// Drain queued frames into the transport, one write at a time.
async fn write_loop(
    mut sink: FrameSink,
    mut frames: mpsc::Receiver<String>,
    generation: u64,
    events: mpsc::UnboundedSender<Event>,
) {
    while let Some(frame) = frames.recv().await {
        let event = match tokio::time::timeout(WRITE_TIMEOUT, sink.send(frame.clone())).await {
            Ok(Ok(())) => Event::Written { bytes: frame.len() },
            Ok(Err(error)) => Event::WriteFailed { frame, error },
            Err(_) => {
                warn!(
                    generation,
                    timeout_secs = WRITE_TIMEOUT.as_secs(),
                    "channel write stalled, closing"
                );
                let error = ChannelError::Write("write timed out".into());
                let _ = events.send(Event::WriteFailed { frame, error });
                let _ = events.send(Event::Closed { generation });
                return;
            }
        };
        if events.send(event).is_err() {
            return;
        }
    }
}
