//! WebSocket connection and event loop.
//!
//! This module owns the socket to one controller endpoint, including the
//! reconnect policy and the boundary decoding of inbound frames.
//!
//! # Event Loop
//!
//! [`Connection::connect`] spawns a tokio task that handles:
//!
//! - Connecting and reconnecting with capped exponential backoff
//! - Incoming frames from the controller, decoded into [`Inbound`]
//! - Outgoing frames from the Rust API, written in submission order
//! - Shutdown on [`Connection::close`] or when the last handle drops
//!
//! # States
//!
//! ```text
//! Connecting ──► Open ──► Reconnecting ──► Open
//!     │            │            │
//!     └────────────┴────────────┴──────► Closed (terminal)
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::Endpoint;
use crate::protocol::Inbound;

use super::options::{ConnectionOption, ConnectionOptions};

// ============================================================================
// Types
// ============================================================================

type ControllerStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Receiver of everything the connection reads.
///
/// Exactly one handler is installed per connection.
pub trait InboundHandler: Send + Sync + 'static {
    /// Called for every decoded inbound frame while the connection is open.
    fn on_message(&self, message: Inbound);

    /// Called after a socket session ends, once the state has left `Open`.
    fn on_disconnect(&self) {}
}

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// First connect attempt in progress (or not yet started).
    Connecting,
    /// Socket is up; frames can be sent.
    Open,
    /// Socket dropped; waiting to retry.
    Reconnecting,
    /// Shut down for good.
    Closed,
}

impl ConnectionState {
    /// Projects the state onto the two-valued status shown to consumers.
    #[inline]
    #[must_use]
    pub const fn status(self) -> ConnectionStatus {
        match self {
            Self::Open => ConnectionStatus::Connected,
            _ => ConnectionStatus::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Consumer-facing connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// The connection is open.
    Connected,
    /// The connection is anything but open.
    Disconnected,
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Write a frame if `session` is still the live socket session.
    Send { session: u64, frame: String },
    /// Shut the connection down.
    Shutdown { done: Option<oneshot::Sender<()>> },
}

/// Why the event loop should stop.
struct ShutdownRequest(Option<oneshot::Sender<()>>);

enum SessionEnd {
    Dropped,
    Shutdown(ShutdownRequest),
}

// ============================================================================
// Shared
// ============================================================================

struct Shared {
    endpoint: Endpoint,
    options: ConnectionOptions,
    can_reconnect: AtomicBool,
    state: watch::Sender<ConnectionState>,
    /// Id of the most recently opened socket session.
    session: AtomicU64,
    /// Connect failure that ended the event loop, if any.
    failure: Mutex<Option<String>>,
    handler: RwLock<Option<Arc<dyn InboundHandler>>>,
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// Taken by the event loop on `connect`.
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<ConnectionCommand>>>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Moves to `next` unless already `Closed`.
    fn set_state(&self, next: ConnectionState) {
        let mut previous = None;
        self.state.send_if_modified(|state| {
            if *state == next || *state == ConnectionState::Closed {
                return false;
            }
            previous = Some(*state);
            *state = next;
            true
        });

        if let Some(previous) = previous {
            debug!(endpoint = %self.endpoint, from = %previous, to = %next, "Connection state changed");
        }
    }

    fn handler(&self) -> Option<Arc<dyn InboundHandler>> {
        self.handler.read().clone()
    }

    fn dispatch_inbound(&self, text: &str) {
        match Inbound::decode(text) {
            Ok(message) => {
                if let Some(handler) = self.handler() {
                    handler.on_message(message);
                } else {
                    trace!(endpoint = %self.endpoint, "No inbound handler, frame dropped");
                }
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, text = %text, "Failed to decode inbound frame");
            }
        }
    }

    fn notify_disconnect(&self) {
        if let Some(handler) = self.handler() {
            handler.on_disconnect();
        }
    }
}

/// Shuts the event loop down when the last [`Connection`] handle drops.
struct ShutdownOnDrop(mpsc::UnboundedSender<ConnectionCommand>);

impl Drop for ShutdownOnDrop {
    fn drop(&mut self) {
        let _ = self.0.send(ConnectionCommand::Shutdown { done: None });
    }
}

// ============================================================================
// Connection
// ============================================================================

/// WebSocket connection to one controller endpoint.
///
/// Cloning is cheap; all clones share the same socket. The event loop stops
/// on [`Connection::close`] or once every clone has been dropped.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync`. The socket itself is owned by the event
/// loop task; callers only submit frames through a channel.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
    _guard: Arc<ShutdownOnDrop>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.shared.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    /// Creates a connection without starting it.
    #[must_use]
    pub fn new(endpoint: Endpoint, options: ConnectionOptions) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Connecting);

        let shared = Arc::new(Shared {
            endpoint,
            can_reconnect: AtomicBool::new(options.can_reconnect),
            options,
            state,
            session: AtomicU64::new(0),
            failure: Mutex::new(None),
            handler: RwLock::new(None),
            command_tx: command_tx.clone(),
            command_rx: Mutex::new(Some(command_rx)),
        });

        Self {
            shared,
            _guard: Arc::new(ShutdownOnDrop(command_tx)),
        }
    }

    /// Starts the event loop.
    ///
    /// Returns immediately; the state moves from `Connecting` to `Open` once
    /// the socket is up. Calling it again, or after [`close`](Self::close),
    /// does nothing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let Some(command_rx) = self.shared.command_rx.lock().take() else {
            trace!(endpoint = %self.shared.endpoint, "Connect ignored, already started");
            return;
        };

        self.shared.set_state(ConnectionState::Connecting);
        debug!(endpoint = %self.shared.endpoint, "Starting connection");

        tokio::spawn(Self::run_event_loop(Arc::clone(&self.shared), command_rx));
    }

    /// Returns the endpoint this connection targets.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    /// Returns the options the connection was created with.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ConnectionOptions {
        &self.shared.options
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Returns `Connected` iff the state is `Open`.
    #[inline]
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.state().status()
    }

    /// Returns `true` iff the state is `Open`.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Returns a receiver that observes every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Waits until the connection is open.
    ///
    /// # Errors
    ///
    /// - [`Error::Connection`] if it closed because a connect attempt failed
    ///   and reconnecting is disabled
    /// - [`Error::ConnectionClosed`] if it was closed for any other reason
    /// - [`Error::ConnectionTimeout`] if it is not open within `wait`
    pub async fn wait_open(&self, wait: Duration) -> Result<()> {
        let mut state_rx = self.watch_state();
        let reached = timeout(
            wait,
            state_rx.wait_for(|s| matches!(s, ConnectionState::Open | ConnectionState::Closed)),
        )
        .await
        .map_err(|_| Error::connection_timeout(wait.as_millis() as u64))?
        .map(|s| *s)
        .map_err(|_| Error::ConnectionClosed)?;

        match reached {
            ConnectionState::Open => Ok(()),
            _ => Err(self
                .shared
                .failure
                .lock()
                .clone()
                .map_or(Error::ConnectionClosed, Error::connection)),
        }
    }

    /// Applies a runtime option.
    pub fn set_option(&self, option: ConnectionOption) {
        match option {
            ConnectionOption::CanReconnect(value) => {
                self.shared.can_reconnect.store(value, Ordering::SeqCst);
                debug!(endpoint = %self.shared.endpoint, can_reconnect = value, "Option updated");
            }
        }
    }

    /// Returns whether the connection reconnects after a socket drop.
    #[inline]
    #[must_use]
    pub fn can_reconnect(&self) -> bool {
        self.shared.can_reconnect.load(Ordering::SeqCst)
    }

    /// Installs the inbound handler, replacing any previous one.
    pub fn on_message(&self, handler: Arc<dyn InboundHandler>) {
        *self.shared.handler.write() = Some(handler);
    }

    /// Removes the inbound handler.
    pub fn clear_handler(&self) {
        *self.shared.handler.write() = None;
    }

    /// Writes a text frame on the current socket session.
    ///
    /// Frames are written in call order. A frame submitted on one session is
    /// never written on a later one.
    ///
    /// # Errors
    ///
    /// - [`Error::Disconnected`] if the state is not `Open`
    /// - [`Error::ConnectionClosed`] if the event loop has stopped
    pub fn send(&self, frame: String) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Disconnected);
        }
        let session = self.shared.session.load(Ordering::SeqCst);

        self.shared
            .command_tx
            .send(ConnectionCommand::Send { session, frame })
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Closes the connection and waits for the event loop to finish.
    ///
    /// The state becomes `Closed` and no reconnect is attempted afterwards.
    /// Idempotent.
    pub async fn close(&self) {
        self.shared.can_reconnect.store(false, Ordering::SeqCst);

        // Never started: there is no loop to wait for.
        if self.shared.command_rx.lock().take().is_some() {
            self.shared.set_state(ConnectionState::Closed);
            self.shared.notify_disconnect();
            return;
        }

        let (done_tx, done_rx) = oneshot::channel();
        if self
            .shared
            .command_tx
            .send(ConnectionCommand::Shutdown {
                done: Some(done_tx),
            })
            .is_ok()
        {
            let _ = done_rx.await;
        }

        self.shared.set_state(ConnectionState::Closed);
    }

    /// Event loop that connects, reconnects and handles WebSocket I/O.
    async fn run_event_loop(
        shared: Arc<Shared>,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    ) {
        let url = shared.endpoint.ws_url();
        let mut attempt: u32 = 0;
        let mut last_failure: Option<String> = None;

        let stop = loop {
            match Self::idle_until(connect_async(url.as_str()), &mut command_rx).await {
                Err(stop) => break stop,

                Ok(Ok((ws_stream, _))) => {
                    attempt = 0;
                    last_failure = None;
                    let session = shared.session.fetch_add(1, Ordering::SeqCst) + 1;
                    shared.set_state(ConnectionState::Open);
                    info!(endpoint = %shared.endpoint, session, "Controller connection established");

                    match Self::run_session(&shared, ws_stream, session, &mut command_rx).await {
                        SessionEnd::Shutdown(stop) => break stop,
                        SessionEnd::Dropped => {
                            info!(endpoint = %shared.endpoint, session, "Controller connection lost");
                        }
                    }
                }

                Ok(Err(e)) => {
                    warn!(endpoint = %shared.endpoint, error = %e, attempt, "Connect failed");
                    last_failure = Some(format!("{url}: {e}"));
                }
            }

            if !shared.can_reconnect.load(Ordering::SeqCst) {
                *shared.failure.lock() = last_failure.take();
                break ShutdownRequest(None);
            }

            shared.set_state(ConnectionState::Reconnecting);
            shared.notify_disconnect();

            let delay = shared.options.backoff(attempt);
            attempt = attempt.saturating_add(1);
            debug!(endpoint = %shared.endpoint, delay_ms = delay.as_millis() as u64, attempt, "Reconnect scheduled");

            if let Err(stop) = Self::idle_until(sleep(delay), &mut command_rx).await {
                break stop;
            }
        };

        shared.set_state(ConnectionState::Closed);
        shared.notify_disconnect();
        command_rx.close();

        if let Some(done) = stop.0 {
            let _ = done.send(());
        }

        debug!(endpoint = %shared.endpoint, "Event loop terminated");
    }

    /// Drives `future` while no socket is open, discarding stale frames.
    ///
    /// Returns `Err` if shutdown is requested first.
    async fn idle_until<F: Future>(
        future: F,
        command_rx: &mut mpsc::UnboundedReceiver<ConnectionCommand>,
    ) -> std::result::Result<F::Output, ShutdownRequest> {
        tokio::pin!(future);

        loop {
            tokio::select! {
                output = &mut future => return Ok(output),

                command = command_rx.recv() => match command {
                    Some(ConnectionCommand::Send { session, .. }) => {
                        trace!(session, "Dropping frame, no open socket");
                    }
                    Some(ConnectionCommand::Shutdown { done }) => return Err(ShutdownRequest(done)),
                    None => return Err(ShutdownRequest(None)),
                },
            }
        }
    }

    /// Handles one socket session until it drops or shutdown is requested.
    async fn run_session(
        shared: &Shared,
        ws_stream: ControllerStream,
        session: u64,
        command_rx: &mut mpsc::UnboundedReceiver<ConnectionCommand>,
    ) -> SessionEnd {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                // Incoming frames from the controller
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => shared.dispatch_inbound(&text),

                        Some(Ok(Message::Close(_))) => {
                            debug!(endpoint = %shared.endpoint, "WebSocket closed by controller");
                            return SessionEnd::Dropped;
                        }

                        Some(Err(e)) => {
                            warn!(endpoint = %shared.endpoint, error = %e, "WebSocket error");
                            return SessionEnd::Dropped;
                        }

                        None => {
                            debug!(endpoint = %shared.endpoint, "WebSocket stream ended");
                            return SessionEnd::Dropped;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Frames and control from the Rust API
                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send { session: frame_session, frame }) => {
                            if frame_session != session {
                                trace!(frame_session, session, "Dropping frame from previous session");
                                continue;
                            }
                            if let Err(e) = ws_write.send(Message::Text(frame.into())).await {
                                warn!(endpoint = %shared.endpoint, error = %e, "Failed to write frame");
                                return SessionEnd::Dropped;
                            }
                            trace!(session, "Frame sent");
                        }

                        Some(ConnectionCommand::Shutdown { done }) => {
                            debug!(endpoint = %shared.endpoint, "Shutdown command received");
                            let _ = ws_write.close().await;
                            return SessionEnd::Shutdown(ShutdownRequest(done));
                        }

                        None => {
                            let _ = ws_write.close().await;
                            return SessionEnd::Shutdown(ShutdownRequest(None));
                        }
                    }
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
