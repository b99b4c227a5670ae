//! In-process mock controller for tests.
//!
//! Binds `127.0.0.1:0`, accepts WebSocket clients and answers `getpin`,
//! `output` and `list` from an in-memory pin table. Tests can push frames,
//! drop the live socket, refuse new sockets, or stay silent.

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::identifiers::Endpoint;
use crate::protocol::UNKNOWN_PIN_SENTINEL;

use super::{Connection, ConnectionOptions, ConnectionState};

// ============================================================================
// Helpers
// ============================================================================

/// Installs a test tracing subscriber once (`RUST_LOG` controls output).
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Options with short delays suitable for tests.
pub(crate) fn fast_options() -> ConnectionOptions {
    ConnectionOptions::new()
        .with_reconnect_delay(Duration::from_millis(10))
        .with_max_reconnect_delay(Duration::from_millis(40))
        .with_command_timeout(Some(Duration::from_secs(5)))
}

/// Waits up to five seconds for `connection` to reach `state`.
pub(crate) async fn wait_for_state(connection: &Connection, state: ConnectionState) {
    let mut state_rx = connection.watch_state();
    timeout(Duration::from_secs(5), state_rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}"))
        .expect("state channel open");
}

/// Returns an endpoint nothing is listening on.
pub(crate) async fn unused_endpoint() -> Endpoint {
    let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
        .await
        .expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    Endpoint::new("127.0.0.1", port).expect("endpoint")
}

// ============================================================================
// MockController
// ============================================================================

enum Control {
    Push(String),
    Drop,
}

#[derive(Default)]
struct MockState {
    pins: Mutex<FxHashMap<String, String>>,
    requests: Mutex<Vec<Value>>,
    control: Mutex<Option<mpsc::UnboundedSender<Control>>>,
    sessions: AtomicUsize,
    refuse: AtomicBool,
    silent: AtomicBool,
    echo_ids: AtomicBool,
}

/// Scriptable stand-in for a controller.
pub(crate) struct MockController {
    port: u16,
    state: Arc<MockState>,
    accept_task: JoinHandle<()>,
}

impl MockController {
    /// Starts a controller with pins `I_1 = 1`, `I_2 = 0`, `O_1 = 0`.
    pub(crate) async fn start() -> Self {
        init_tracing();

        let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .await
            .expect("bind mock controller");
        let port = listener.local_addr().expect("local addr").port();

        let state = Arc::new(MockState::default());
        {
            let mut pins = state.pins.lock();
            pins.insert("I_1".into(), "1".into());
            pins.insert("I_2".into(), "0".into());
            pins.insert("O_1".into(), "0".into());
        }

        let accept_task = tokio::spawn(Self::accept_loop(listener, Arc::clone(&state)));

        Self {
            port,
            state,
            accept_task,
        }
    }

    pub(crate) fn endpoint(&self) -> Endpoint {
        Endpoint::new("127.0.0.1", self.port).expect("endpoint")
    }

    pub(crate) fn set_pin(&self, name: &str, value: &str) {
        self.state.pins.lock().insert(name.into(), value.into());
    }

    pub(crate) fn pin(&self, name: &str) -> Option<String> {
        self.state.pins.lock().get(name).cloned()
    }

    /// Number of WebSocket sessions accepted so far.
    pub(crate) fn sessions(&self) -> usize {
        self.state.sessions.load(Ordering::SeqCst)
    }

    /// Requests received so far, in arrival order.
    pub(crate) fn requests(&self) -> Vec<Value> {
        self.state.requests.lock().clone()
    }

    /// Drop TCP connections before the WebSocket handshake.
    pub(crate) fn set_refuse(&self, refuse: bool) {
        self.state.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Record requests without answering them.
    pub(crate) fn set_silent(&self, silent: bool) {
        self.state.silent.store(silent, Ordering::SeqCst);
    }

    /// Echo the request `id` in replies.
    pub(crate) fn set_echo_ids(&self, echo: bool) {
        self.state.echo_ids.store(echo, Ordering::SeqCst);
    }

    pub(crate) fn push_raw(&self, text: impl Into<String>) {
        if let Some(tx) = self.state.control.lock().as_ref() {
            let _ = tx.send(Control::Push(text.into()));
        }
    }

    pub(crate) fn push_pin(&self, name: &str, value: &str) {
        self.push_raw(json!({"cmd": "input", "msg": {"name": name, "value": value}}).to_string());
    }

    /// Closes the live WebSocket session.
    pub(crate) fn drop_connection(&self) {
        if let Some(tx) = self.state.control.lock().take() {
            let _ = tx.send(Control::Drop);
        }
    }

    /// Waits until `count` requests have arrived.
    pub(crate) async fn wait_for_requests(&self, count: usize) {
        timeout(Duration::from_secs(5), async {
            while self.state.requests.lock().len() < count {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("requests arrived");
    }

    async fn accept_loop(listener: TcpListener, state: Arc<MockState>) {
        while let Ok((stream, _)) = listener.accept().await {
            if state.refuse.load(Ordering::SeqCst) {
                drop(stream);
                continue;
            }
            tokio::spawn(Self::serve(stream, Arc::clone(&state)));
        }
    }

    async fn serve(stream: TcpStream, state: Arc<MockState>) {
        let Ok(mut ws) = accept_async(stream).await else {
            return;
        };

        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        *state.control.lock() = Some(control_tx);
        state.sessions.fetch_add(1, Ordering::SeqCst);
        debug!("Mock controller session started");

        loop {
            tokio::select! {
                message = ws.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(request) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        state.requests.lock().push(request.clone());
                        if state.silent.load(Ordering::SeqCst) {
                            continue;
                        }
                        let reply = Self::respond(&state, &request);
                        if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                },

                control = control_rx.recv() => match control {
                    Some(Control::Push(text)) => {
                        if ws.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Control::Drop) | None => {
                        let _ = ws.close(None).await;
                        break;
                    }
                },
            }
        }

        debug!("Mock controller session ended");
    }

    fn respond(state: &MockState, request: &Value) -> Value {
        let cmd = request["cmd"].as_str().unwrap_or_default();
        let params = request["params"].as_array().cloned().unwrap_or_default();
        let pin = params
            .first()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let msg = match cmd {
            "getpin" => {
                let value = state
                    .pins
                    .lock()
                    .get(&pin)
                    .cloned()
                    .unwrap_or_else(|| UNKNOWN_PIN_SENTINEL.to_string());
                json!({"name": pin, "value": value})
            }
            "output" => {
                let mut pins = state.pins.lock();
                match pins.get_mut(&pin) {
                    Some(slot) => {
                        *slot = match params.get(1) {
                            Some(Value::String(s)) => s.clone(),
                            Some(other) => other.to_string(),
                            None => String::new(),
                        };
                        json!("OK")
                    }
                    None => json!(UNKNOWN_PIN_SENTINEL),
                }
            }
            "list" => {
                let mut names: Vec<String> = state.pins.lock().keys().cloned().collect();
                names.sort();
                json!(names)
            }
            _ => Value::Null,
        };

        let mut reply = json!({"cmd": cmd, "msg": msg});
        if state.echo_ids.load(Ordering::SeqCst) {
            reply["id"] = request["id"].clone();
        }
        reply
    }
}

impl Drop for MockController {
    fn drop(&mut self) {
        self.accept_task.abort();
        if let Some(tx) = self.state.control.lock().take() {
            let _ = tx.send(Control::Drop);
        }
    }
}
