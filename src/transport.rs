//! Transport – the single WebSocket channel to the AI service.
//!
//! ## Threading model
//!
//! ```text
//! Server main thread           │  Transport thread (Tokio, current-thread)
//! ─────────────────────────────│──────────────────────────────────────────
//! TickDriver                   │  Worker::run()
//!   → handle.send(snapshot)    │    outbound.recv() → ws.send(Text)
//!                              │    ws.next()       → handler.on_message
//! AiBridge::on_server_stopping │
//!   → handle.close()           │    outbound.recv() → Close frame, exit
//! ```
//!
//! The transport thread owns the socket and the Tokio runtime. The main
//! thread only touches the [`TransportHandle`]: a connection-state cell and
//! the sending half of an unbounded queue. Handler callbacks fire on the
//! transport thread and must not touch world state.
//!
//! Every socket write is bounded by the close grace. A peer that stops
//! reading is treated as a lost connection, which keeps `shutdown` bounded.

use crate::config::{BridgeConfig, ReconnectPolicy};
use crate::types::{BridgeStats, ConnectionState};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};

/// Close code reported when the socket vanished without a close frame.
pub const ABNORMAL_CLOSE: u16 = 1006;
const NO_STATUS: u16 = 1005;
const STOP_REASON: &str = "server stopping";
/// Extra time `shutdown` allows on top of the close-grace bound.
const SHUTDOWN_SLACK: Duration = Duration::from_millis(250);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: tungstenite::Error,
    },
    #[error("socket error: {0}")]
    Socket(#[from] tungstenite::Error),
    #[error("peer stopped reading; write stalled for {0:?}")]
    Stalled(Duration),
    #[error("failed to start transport thread: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("transport already started")]
    AlreadyStarted,
}

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

/// Receives connection events. Every method runs on the transport thread.
pub trait TransportHandler: Send + Sync + 'static {
    fn on_open(&self) {}
    fn on_message(&self, text: String);
    fn on_close(&self, _code: u16, _reason: &str, _remote: bool) {}
    fn on_error(&self, _error: &TransportError) {}
}

/// Anything the tick driver can push snapshots into.
pub trait SnapshotSink {
    fn is_open(&self) -> bool;
    /// Queue one text frame. Returns `false` when the frame was dropped.
    fn send(&self, text: String) -> bool;
}

// ---------------------------------------------------------------------------
// Handle (shared with the main thread)
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Command {
    Text(String),
    Close,
}

/// Cheap, cloneable view of the transport for the main thread.
#[derive(Clone)]
pub struct TransportHandle {
    state: Arc<RwLock<ConnectionState>>,
    outbound: mpsc::UnboundedSender<Command>,
}

impl TransportHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Queue a text frame. Frames are silently dropped unless the channel is
    /// open.
    pub fn send(&self, text: impl Into<String>) -> bool {
        if !self.is_open() {
            debug!("[aicraft] Channel not open – dropping outbound frame");
            return false;
        }
        self.outbound.send(Command::Text(text.into())).is_ok()
    }

    /// Request a graceful close. Never blocks.
    pub fn close(&self) {
        {
            let mut state = self.state.write();
            match *state {
                ConnectionState::Open | ConnectionState::Connecting => {
                    *state = ConnectionState::Closing
                }
                ConnectionState::Closing | ConnectionState::Closed => {}
                ConnectionState::Disconnected => {
                    *state = ConnectionState::Closed;
                    return;
                }
            }
        }
        if self.outbound.send(Command::Close).is_err() {
            *self.state.write() = ConnectionState::Closed;
        }
    }
}

impl SnapshotSink for TransportHandle {
    fn is_open(&self) -> bool {
        TransportHandle::is_open(self)
    }

    fn send(&self, text: String) -> bool {
        TransportHandle::send(self, text)
    }
}

// ---------------------------------------------------------------------------
// TransportClient
// ---------------------------------------------------------------------------

/// Owns the transport thread. Create with [`TransportClient::new`], then call
/// [`connect`](TransportClient::connect) once.
pub struct TransportClient {
    endpoint: String,
    reconnect: ReconnectPolicy,
    close_grace: Duration,
    handler: Arc<dyn TransportHandler>,
    stats: Arc<BridgeStats>,
    handle: TransportHandle,
    outbound_rx: Option<mpsc::UnboundedReceiver<Command>>,
    thread: Option<thread::JoinHandle<()>>,
    exited: Option<crossbeam_channel::Receiver<()>>,
}

impl TransportClient {
    pub fn new(endpoint: impl Into<String>, handler: Arc<dyn TransportHandler>) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        Self {
            endpoint: endpoint.into(),
            reconnect: ReconnectPolicy::disabled(),
            close_grace: Duration::from_secs(2),
            handler,
            stats: Arc::new(BridgeStats::new()),
            handle: TransportHandle {
                state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
                outbound,
            },
            outbound_rx: Some(outbound_rx),
            thread: None,
            exited: None,
        }
    }

    /// Build a client from the endpoint, reconnect and close settings of
    /// `config`.
    pub fn from_config(config: &BridgeConfig, handler: Arc<dyn TransportHandler>) -> Self {
        Self::new(config.endpoint.clone(), handler)
            .with_reconnect(config.reconnect.clone())
            .with_close_grace(config.close_grace())
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    pub fn with_stats(mut self, stats: Arc<BridgeStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    /// Start the transport thread. Returns immediately; the outcome of the
    /// handshake is reported through the handler.
    pub fn connect(&mut self) -> Result<(), TransportError> {
        let Some(outbound) = self.outbound_rx.take() else {
            return Err(TransportError::AlreadyStarted);
        };
        *self.handle.state.write() = ConnectionState::Connecting;

        let worker = Worker {
            endpoint: self.endpoint.clone(),
            reconnect: self.reconnect.clone(),
            close_grace: self.close_grace,
            handler: self.handler.clone(),
            stats: self.stats.clone(),
            state: self.handle.state.clone(),
            outbound,
        };

        // Disconnects when the thread returns, panics included.
        let (exit_tx, exit_rx) = crossbeam_channel::bounded::<()>(0);

        let spawned = thread::Builder::new()
            .name("aicraft-transport".into())
            .spawn(move || {
                let _exit = exit_tx;
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build();
                match runtime {
                    Ok(rt) => rt.block_on(worker.run()),
                    Err(e) => {
                        error!("[aicraft] Failed to create transport runtime: {}", e);
                        worker.set_state(ConnectionState::Closed);
                        worker.handler.on_error(&TransportError::Runtime(e));
                    }
                }
            });

        match spawned {
            Ok(join) => {
                self.thread = Some(join);
                self.exited = Some(exit_rx);
                Ok(())
            }
            Err(e) => {
                *self.handle.state.write() = ConnectionState::Closed;
                Err(TransportError::Runtime(e))
            }
        }
    }

    pub fn send(&self, text: impl Into<String>) -> bool {
        self.handle.send(text)
    }

    pub fn close(&self) {
        self.handle.close();
    }

    /// Close and wait for the transport thread to exit.
    ///
    /// The wait is bounded: every socket write on the worker is limited to
    /// the close grace, so a healthy worker exits within three of them. Past
    /// that the thread is detached and left to finish on its own.
    pub fn shutdown(&mut self) {
        self.handle.close();
        let Some(join) = self.thread.take() else {
            return;
        };
        let deadline = self.close_grace * 3 + SHUTDOWN_SLACK;
        let exited = match self.exited.take() {
            Some(rx) => !matches!(
                rx.recv_timeout(deadline),
                Err(crossbeam_channel::RecvTimeoutError::Timeout)
            ),
            None => true,
        };
        if !exited {
            warn!(
                "[aicraft] Transport thread still busy after {:?} – detaching",
                deadline
            );
            *self.handle.state.write() = ConnectionState::Closed;
            return;
        }
        if join.join().is_err() {
            error!("[aicraft] Transport thread panicked");
        }
    }
}

impl Drop for TransportClient {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.handle.close();
        }
    }
}

// ---------------------------------------------------------------------------
// Worker (runs on the transport thread)
// ---------------------------------------------------------------------------

enum Outcome {
    /// The connection failed or dropped; a retry may follow.
    Lost { was_open: bool },
    /// `close()` was requested; the worker must exit.
    Stopped,
}

struct Worker {
    endpoint: String,
    reconnect: ReconnectPolicy,
    close_grace: Duration,
    handler: Arc<dyn TransportHandler>,
    stats: Arc<BridgeStats>,
    state: Arc<RwLock<ConnectionState>>,
    outbound: mpsc::UnboundedReceiver<Command>,
}

type Socket = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

impl Worker {
    fn set_state(&self, next: ConnectionState) {
        *self.state.write() = next;
    }

    async fn run(mut self) {
        let mut failures: u32 = 0;
        loop {
            let outcome = self.connect_once().await;
            match outcome {
                Outcome::Stopped => {
                    self.set_state(ConnectionState::Closed);
                    return;
                }
                Outcome::Lost { was_open: true } => failures = 1,
                Outcome::Lost { was_open: false } => failures += 1,
            }
            if failures > self.reconnect.max_retries {
                if self.reconnect.is_enabled() {
                    warn!(
                        "[aicraft] Giving up on {} after {} attempts",
                        self.endpoint, failures
                    );
                } else {
                    info!("[aicraft] Channel inactive – snapshots disabled");
                }
                return;
            }

            let delay = self.reconnect.backoff(failures);
            info!(
                "[aicraft] Reconnecting to {} in {:?} (attempt {}/{})",
                self.endpoint, delay, failures, self.reconnect.max_retries
            );
            let stopped = tokio::select! {
                _ = tokio::time::sleep(delay) => false,
                _ = wait_for_close(&mut self.outbound) => true,
            };
            if stopped {
                self.set_state(ConnectionState::Closed);
                return;
            }
        }
    }

    async fn connect_once(&mut self) -> Outcome {
        self.set_state(ConnectionState::Connecting);
        self.stats.record_connection_attempt();
        debug!("[aicraft] Connecting to {}", self.endpoint);

        let attempt = tokio::select! {
            result = tokio_tungstenite::connect_async(self.endpoint.as_str()) => result,
            _ = wait_for_close(&mut self.outbound) => return Outcome::Stopped,
        };

        let socket = match attempt {
            Ok((socket, _response)) => socket,
            Err(source) => {
                self.set_state(ConnectionState::Closed);
                let err = TransportError::Connect {
                    endpoint: self.endpoint.clone(),
                    source,
                };
                debug!("[aicraft] {}", err);
                self.handler.on_error(&err);
                return Outcome::Lost { was_open: false };
            }
        };

        // Frames queued by a previous session must not leak into this one.
        let mut socket = socket;
        if self.discard_stale() {
            self.close_gracefully(&mut socket).await;
            return Outcome::Stopped;
        }

        self.set_state(ConnectionState::Open);
        info!("[aicraft] WebSocket connected to {}", self.endpoint);
        self.handler.on_open();
        self.pump(socket).await
    }

    /// Drop queued text frames. Returns `true` if a close was requested.
    fn discard_stale(&mut self) -> bool {
        let mut close_requested = false;
        while let Ok(cmd) = self.outbound.try_recv() {
            if let Command::Close = cmd {
                close_requested = true;
            }
        }
        close_requested
    }

    async fn pump(&mut self, socket: Socket) -> Outcome {
        let (mut write, mut read) = socket.split();
        loop {
            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handler.on_message(text),
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.to_string()))
                            .unwrap_or((NO_STATUS, String::new()));
                        self.set_state(ConnectionState::Closed);
                        debug!("[aicraft] WebSocket closed by peer ({} {})", code, reason);
                        let _ = tokio::time::timeout(self.close_grace, write.close()).await;
                        self.handler.on_close(code, &reason, true);
                        return Outcome::Lost { was_open: true };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        self.set_state(ConnectionState::Closed);
                        let err = TransportError::Socket(e);
                        debug!("[aicraft] {}", err);
                        self.handler.on_error(&err);
                        self.handler.on_close(ABNORMAL_CLOSE, "", true);
                        return Outcome::Lost { was_open: true };
                    }
                    None => {
                        self.set_state(ConnectionState::Closed);
                        debug!("[aicraft] WebSocket closed");
                        self.handler.on_close(ABNORMAL_CLOSE, "", true);
                        return Outcome::Lost { was_open: true };
                    }
                },
                cmd = self.outbound.recv() => match cmd {
                    Some(Command::Text(text)) => {
                        let sent =
                            tokio::time::timeout(self.close_grace, write.send(Message::Text(text)))
                                .await;
                        let failed = match sent {
                            Ok(Ok(())) => None,
                            Ok(Err(e)) => Some(TransportError::Socket(e)),
                            Err(_) => Some(TransportError::Stalled(self.close_grace)),
                        };
                        if let Some(err) = failed {
                            self.set_state(ConnectionState::Closed);
                            debug!("[aicraft] {}", err);
                            self.handler.on_error(&err);
                            self.handler.on_close(ABNORMAL_CLOSE, "", false);
                            return Outcome::Lost { was_open: true };
                        }
                    }
                    Some(Command::Close) | None => {
                        self.set_state(ConnectionState::Closing);
                        self.close_gracefully(&mut write).await;
                        // Wait for the peer to echo the close frame.
                        let drain = async { while let Some(Ok(_)) = read.next().await {} };
                        let _ = tokio::time::timeout(self.close_grace, drain).await;
                        self.set_state(ConnectionState::Closed);
                        debug!("[aicraft] WebSocket closed");
                        self.handler.on_close(u16::from(CloseCode::Normal), STOP_REASON, false);
                        return Outcome::Stopped;
                    }
                },
            }
        }
    }

    async fn close_gracefully<S>(&self, write: &mut S)
    where
        S: futures_util::Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: STOP_REASON.into(),
        };
        match tokio::time::timeout(self.close_grace, write.send(Message::Close(Some(frame)))).await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("[aicraft] Close frame not delivered: {}", e),
            Err(_) => debug!("[aicraft] Close frame not delivered within {:?}", self.close_grace),
        }
    }
}

/// Resolves once a close is requested or every handle is gone.
async fn wait_for_close(outbound: &mut mpsc::UnboundedReceiver<Command>) {
    while let Some(Command::Text(_)) = outbound.recv().await {}
}
