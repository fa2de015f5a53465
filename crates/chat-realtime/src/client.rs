//! Reconnecting WebSocket client for the chat rooms.
//!
//! One room is open at a time. Each `connect` starts a new connection
//! generation driven by a single task; that task owns the socket, the
//! heartbeat and the reconnect wait, so tearing it down stops all three.

use crate::connection_fsm::{ConnectionMachine, ConnectionMachineInput, ConnectionState};
use crate::connector::{Connector, Frame, FrameSink, TungsteniteConnector};
use crate::messages::{ClientMessage, RoomId, ServerMessage};
use crate::{RealtimeError, RealtimeResult};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use url::Url;

/// Close code for an intentional close.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code used when the socket dropped without a close handshake.
pub const ABNORMAL_CLOSURE: u16 = 1006;
const NO_STATUS_RECEIVED: u16 = 1005;

const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const OUTBOUND_CAPACITY: usize = 100;

/// Realtime client configuration.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Socket base URL (e.g., ws://localhost:8000).
    pub url: String,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Delay before the single reconnect attempt after an unclean close.
    pub reconnect_delay_secs: u64,
    /// Upgrade `ws://` to `wss://` when the app itself runs over HTTPS.
    pub secure_context: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8000".to_string(),
            heartbeat_interval_secs: 30,
            reconnect_delay_secs: 3,
            secure_context: false,
        }
    }
}

impl RealtimeConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// `{url}/ws/chat/{room}/?token={token}`
    pub fn room_url(&self, room: &RoomId, token: &str) -> RealtimeResult<Url> {
        let base = self.url.trim_end_matches('/');
        let mut url = Url::parse(&format!("{}/ws/chat/{}/", base, room))?;
        url.query_pairs_mut().append_pair("token", token);

        if self.secure_context && url.scheme() == "ws" {
            url.set_scheme("wss")
                .map_err(|_| RealtimeError::Connection("cannot upgrade to wss".to_string()))?;
        }

        Ok(url)
    }
}

/// Events emitted by the realtime client.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    Open,
    Message(ServerMessage),
    Close { code: u16 },
    Error(String),
}

impl RealtimeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RealtimeEvent::Open => EventKind::Open,
            RealtimeEvent::Message(_) => EventKind::Message,
            RealtimeEvent::Close { .. } => EventKind::Close,
            RealtimeEvent::Error(_) => EventKind::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Message,
    Close,
    Error,
}

/// Event listener; identity (the `Arc` allocation) is what `off` matches.
pub type Listener = Arc<dyn Fn(&RealtimeEvent) + Send + Sync>;

struct Connection {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct Shared {
    fsm: ConnectionMachine,
    token: Option<String>,
    room: Option<RoomId>,
    should_reconnect: bool,
    generation: u64,
    connection: Option<Connection>,
    /// Outbound queue of the open socket; `None` unless `Open`.
    outbound: Option<mpsc::Sender<Frame>>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from(self.fsm.state())
    }

    fn apply(&mut self, input: ConnectionMachineInput) {
        let from = self.state();
        if self.fsm.consume(&input).is_err() {
            debug!(input = ?input, state = ?from, "connection input ignored");
            return;
        }
        let to = self.state();
        if from != to {
            debug!(from = ?from, to = ?to, "Connection state transition");
        }
    }
}

struct Inner {
    config: RealtimeConfig,
    connector: Arc<dyn Connector>,
    shared: Mutex<Shared>,
    listeners: Mutex<Vec<(EventKind, Listener)>>,
    events: broadcast::Sender<RealtimeEvent>,
}

enum SocketEnd {
    /// Torn down by `connect` or `disconnect`.
    Shutdown,
    Closed(u16),
}

/// WebSocket client with single-shot reconnection.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

impl RealtimeClient {
    /// Create a client backed by `tokio-tungstenite`.
    pub fn new(config: RealtimeConfig) -> Self {
        Self::with_connector(config, Arc::new(TungsteniteConnector))
    }

    pub fn with_connector(config: RealtimeConfig, connector: Arc<dyn Connector>) -> Self {
        let (events, _) = broadcast::channel(100);

        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                shared: Mutex::new(Shared {
                    fsm: ConnectionMachine::new(),
                    token: None,
                    room: None,
                    should_reconnect: true,
                    generation: 0,
                    connection: None,
                    outbound: None,
                }),
                listeners: Mutex::new(Vec::new()),
                events,
            }),
        }
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state()
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Room of the current (or last) connection.
    pub fn current_room(&self) -> Option<RoomId> {
        self.inner.shared.lock().room.clone()
    }

    /// Subscribe to all events as an async stream.
    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.inner.events.subscribe()
    }

    /// Open a socket for `room`, replacing the current one.
    ///
    /// Does nothing when the token or room is empty. When the socket is
    /// already open on the same room it stays up; the token is kept for later
    /// reconnects. Returns once the previous socket is
    /// closed and the new one is being opened; `Open` is emitted when the
    /// handshake completes.
    pub async fn connect(&self, token: &str, room: impl Into<RoomId>) {
        let room = room.into();
        if token.is_empty() || room.is_empty() {
            debug!("connect skipped: missing token or room");
            return;
        }

        let (generation, previous) = {
            let mut shared = self.inner.shared.lock();
            shared.should_reconnect = true;

            shared.token = Some(token.to_string());
            if shared.state().is_open() && shared.room.as_ref() == Some(&room) {
                debug!(room = %room, "already connected to room");
                return;
            }

            shared.room = Some(room.clone());
            shared.generation += 1;
            shared.outbound = None;
            shared.apply(ConnectionMachineInput::Connect);
            (shared.generation, shared.connection.take())
        };

        if let Some(previous) = previous {
            debug!("tearing down previous connection");
            self.teardown(previous).await;
        }

        info!(room = %room, "Connecting to chat room");
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(self.clone().drive(generation, shutdown_rx));

        let mut shared = self.inner.shared.lock();
        if shared.generation == generation {
            shared.connection = Some(Connection { shutdown, task });
        }
        // Otherwise a newer connect won; dropping `shutdown` stops this one.
    }

    /// Close the socket and cancel any pending reconnect.
    ///
    /// `permanent` also clears the reconnect desire; an explicit `connect`
    /// sets it again.
    pub async fn disconnect(&self, permanent: bool) {
        let connection = {
            let mut shared = self.inner.shared.lock();
            if permanent {
                shared.should_reconnect = false;
                shared.apply(ConnectionMachineInput::DisconnectPermanently);
            } else {
                shared.apply(ConnectionMachineInput::Disconnect);
            }
            shared.generation += 1;
            shared.outbound = None;
            shared.connection.take()
        };

        if let Some(connection) = connection {
            info!(permanent, "Disconnecting from chat room");
            self.teardown(connection).await;
        }
    }

    /// Serialize and queue `message` if the socket is open.
    ///
    /// Returns false (and drops the message) otherwise.
    pub fn send<T: Serialize>(&self, message: &T) -> bool {
        let shared = self.inner.shared.lock();
        let Some(outbound) = shared.outbound.as_ref().filter(|_| shared.state().is_open()) else {
            debug!("socket not open, dropping outbound message");
            return false;
        };

        match serde_json::to_string(message) {
            Ok(json) => outbound.try_send(Frame::Text(json)).is_ok(),
            Err(e) => {
                warn!(error = %e, "failed to serialize outbound message");
                false
            }
        }
    }

    /// Register `listener` for events of `kind`. Listeners run in
    /// registration order; registering the same one twice calls it twice.
    pub fn on(&self, kind: EventKind, listener: Listener) {
        self.inner.listeners.lock().push((kind, listener));
    }

    /// Remove every registration of `listener` for `kind`.
    pub fn off(&self, kind: EventKind, listener: &Listener) {
        self.inner.listeners.lock().retain(|(k, l)| {
            !(*k == kind && std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)))
        });
    }

    async fn teardown(&self, connection: Connection) {
        let Connection { shutdown, mut task } = connection;
        // The task may already have finished.
        let _ = shutdown.send(());

        if timeout(TEARDOWN_TIMEOUT, &mut task).await.is_err() {
            warn!("connection task did not stop in time, aborting");
            task.abort();
        }
    }

    /// Connection task for one generation: open, pump, and on an unclean
    /// close wait once and go again.
    async fn drive(self, generation: u64, mut shutdown: oneshot::Receiver<()>) {
        loop {
            let Some(url) = self.target_url(generation) else {
                return;
            };

            let code = match self.run_socket(generation, &url, &mut shutdown).await {
                SocketEnd::Shutdown => {
                    self.emit(RealtimeEvent::Close {
                        code: NORMAL_CLOSURE,
                    });
                    return;
                }
                SocketEnd::Closed(code) => code,
            };

            if !self.handle_close(generation, code) {
                return;
            }

            tokio::select! {
                _ = sleep(Duration::from_secs(self.inner.config.reconnect_delay_secs)) => {}
                _ = &mut shutdown => return,
            }

            if !self.fire_reconnect(generation) {
                return;
            }
        }
    }

    fn target_url(&self, generation: u64) -> Option<Url> {
        let (token, room) = {
            let shared = self.inner.shared.lock();
            if shared.generation != generation {
                return None;
            }
            (shared.token.clone()?, shared.room.clone()?)
        };

        match self.inner.config.room_url(&room, &token) {
            Ok(url) => Some(url),
            Err(e) => {
                error!(room = %room, error = %e, "invalid socket URL");
                self.emit(RealtimeEvent::Error(e.to_string()));
                let mut shared = self.inner.shared.lock();
                if shared.generation == generation {
                    shared.apply(ConnectionMachineInput::Closed);
                }
                None
            }
        }
    }

    async fn run_socket(
        &self,
        generation: u64,
        url: &Url,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> SocketEnd {
        let connected = tokio::select! {
            result = self.inner.connector.connect(url) => result,
            _ = &mut *shutdown => return SocketEnd::Shutdown,
        };

        let (mut sink, mut stream) = match connected {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "failed to open socket");
                self.emit(RealtimeEvent::Error(e.to_string()));
                return SocketEnd::Closed(ABNORMAL_CLOSURE);
            }
        };

        let (outbound, mut outbound_rx) = mpsc::channel::<Frame>(OUTBOUND_CAPACITY);
        if !self.opened(generation, outbound) {
            close_sink(&mut sink).await;
            return SocketEnd::Shutdown;
        }
        self.emit(RealtimeEvent::Open);

        let period = Duration::from_secs(self.inner.config.heartbeat_interval_secs.max(1));
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let end = tokio::select! {
                _ = &mut *shutdown => {
                    debug!("closing socket");
                    close_sink(&mut sink).await;
                    Some(SocketEnd::Shutdown)
                }
                frame = stream.next() => match frame {
                    Some(Ok(Frame::Text(text))) => {
                        self.handle_text(&text);
                        None
                    }
                    Some(Ok(Frame::Close(code))) => {
                        let code = code.unwrap_or(NO_STATUS_RECEIVED);
                        info!(code, "Socket closed by server");
                        let _ = sink.close().await;
                        Some(SocketEnd::Closed(code))
                    }
                    Some(Ok(_)) => None,
                    Some(Err(e)) => Some(self.socket_failed(&mut sink, e).await),
                    None => {
                        info!("Socket stream ended");
                        Some(SocketEnd::Closed(ABNORMAL_CLOSURE))
                    }
                },
                Some(frame) = outbound_rx.recv() => match sink.send(frame).await {
                    Ok(()) => None,
                    Err(e) => Some(self.socket_failed(&mut sink, e).await),
                },
                _ = heartbeat.tick() => match ClientMessage::Ping.to_json() {
                    Ok(ping) => match sink.send(Frame::Text(ping)).await {
                        Ok(()) => {
                            debug!("Sent heartbeat");
                            None
                        }
                        Err(e) => Some(self.socket_failed(&mut sink, e).await),
                    },
                    Err(e) => {
                        warn!(error = %e, "failed to encode heartbeat");
                        None
                    }
                },
            };

            if let Some(end) = end {
                return end;
            }
        }
    }

    /// Emit the error, then force the socket closed so the close path runs.
    async fn socket_failed(&self, sink: &mut FrameSink, e: RealtimeError) -> SocketEnd {
        error!(error = %e, "WebSocket error");
        self.emit(RealtimeEvent::Error(e.to_string()));
        let _ = sink.close().await;
        SocketEnd::Closed(ABNORMAL_CLOSURE)
    }

    fn opened(&self, generation: u64, outbound: mpsc::Sender<Frame>) -> bool {
        let mut shared = self.inner.shared.lock();
        if shared.generation != generation {
            return false;
        }
        shared.apply(ConnectionMachineInput::Opened);
        shared.outbound = Some(outbound);
        if let Some(room) = &shared.room {
            info!(room = %room, "Connected to chat room");
        }
        true
    }

    fn handle_text(&self, text: &str) {
        match ServerMessage::parse(text) {
            Ok(message) => {
                debug!(msg_type = ?message.msg_type, "Received message");
                self.emit(RealtimeEvent::Message(message));
            }
            Err(e) => debug!(error = %e, "dropping malformed frame"),
        }
    }

    /// Apply a close to the state and report whether to reconnect.
    fn handle_close(&self, generation: u64, code: u16) -> bool {
        let reconnect = {
            let mut shared = self.inner.shared.lock();
            if shared.generation != generation {
                false
            } else {
                shared.outbound = None;
                let reconnect = code != NORMAL_CLOSURE
                    && shared.should_reconnect
                    && shared.token.is_some()
                    && shared.room.is_some();
                shared.apply(if reconnect {
                    ConnectionMachineInput::ConnectionLost
                } else {
                    ConnectionMachineInput::Closed
                });
                reconnect
            }
        };

        if reconnect {
            info!(
                code,
                delay_secs = self.inner.config.reconnect_delay_secs,
                "Connection lost, scheduling reconnect"
            );
        } else {
            info!(code, "Connection closed");
        }
        self.emit(RealtimeEvent::Close { code });
        reconnect
    }

    fn fire_reconnect(&self, generation: u64) -> bool {
        let mut shared = self.inner.shared.lock();
        if shared.generation != generation || shared.token.is_none() || shared.room.is_none() {
            return false;
        }
        shared.apply(ConnectionMachineInput::ReconnectFired);
        if let Some(room) = &shared.room {
            info!(room = %room, "Reconnecting to chat room");
        }
        true
    }

    fn emit(&self, event: RealtimeEvent) {
        let kind = event.kind();
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, l)| l.clone())
            .collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                error!(kind = ?kind, "realtime listener panicked");
            }
        }

        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}

async fn close_sink(sink: &mut FrameSink) {
    let _ = sink.send(Frame::Close(Some(NORMAL_CLOSURE))).await;
    let _ = sink.close().await;
}
