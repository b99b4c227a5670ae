//! Shared handle to one controller.
//!
//! A [`ControllerClient`] bundles the pieces that serve one endpoint:
//!
//! - One [`Connection`] (socket, event loop, reconnect policy)
//! - One [`CommandDispatcher`] (outstanding commands)
//! - One [`SubscriptionRegistry`] (push subscribers, installed as the
//!   connection's inbound handler)
//!
//! Clones share all three. Handles are normally obtained from a
//! [`ConnectionRegistry`](crate::ConnectionRegistry) so every consumer of an
//! endpoint talks through the same socket.
//!
//! # Example
//!
//! ```no_run
//! use revpi_link::{ConnectionRegistry, Endpoint};
//!
//! # async fn example() -> revpi_link::Result<()> {
//! let registry = ConnectionRegistry::new();
//! let client = registry.acquire(Endpoint::new("revpi.local", 8000)?);
//!
//! let mut input = client.register_input("I_1");
//! let current = client.get_pin("I_1").await?;
//! println!("I_1 is {}", current.value);
//!
//! while let Some(message) = input.recv().await {
//!     println!("{} -> {}", message.topic, message.payload);
//! }
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::dispatch::{
    CommandDispatcher, PendingReply, PendingTable, Subscription, SubscriptionRegistry,
};
use crate::error::{Error, Result};
use crate::identifiers::Endpoint;
use crate::protocol::{Command, PinValue, Reply};
use crate::transport::{
    Connection, ConnectionOption, ConnectionOptions, ConnectionState, ConnectionStatus,
};

// ============================================================================
// Types
// ============================================================================

struct ClientInner {
    connection: Connection,
    dispatcher: CommandDispatcher,
    subscriptions: Arc<SubscriptionRegistry>,
}

// ============================================================================
// ControllerClient
// ============================================================================

/// A cloneable handle to one controller connection.
#[derive(Clone)]
pub struct ControllerClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for ControllerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerClient")
            .field("endpoint", self.endpoint())
            .field("state", &self.state())
            .field("pending", &self.inner.dispatcher.pending_count())
            .field("subscribers", &self.inner.subscriptions.len())
            .finish()
    }
}

// ============================================================================
// ControllerClient - Constructor
// ============================================================================

impl ControllerClient {
    /// Creates a client for `endpoint` without connecting.
    ///
    /// Call [`connect`](Self::connect) to start the connection.
    #[must_use]
    pub fn new(endpoint: Endpoint, options: ConnectionOptions) -> Self {
        let connection = Connection::new(endpoint, options);
        let pending = PendingTable::shared();
        let subscriptions = Arc::new(SubscriptionRegistry::new(Arc::clone(&pending)));

        connection.on_message(Arc::clone(&subscriptions) as _);
        let dispatcher = CommandDispatcher::new(connection.clone(), pending);

        Self {
            inner: Arc::new(ClientInner {
                connection,
                dispatcher,
                subscriptions,
            }),
        }
    }

    /// Starts the connection. No-op if already started.
    pub fn connect(&self) {
        self.inner.connection.connect();
    }
}

// ============================================================================
// ControllerClient - Connection
// ============================================================================

impl ControllerClient {
    /// Returns the endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        self.inner.connection.endpoint()
    }

    /// Returns `true` while the connection is open.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    /// Returns the connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Returns the coarse connection status.
    #[inline]
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.inner.connection.status()
    }

    /// Returns a receiver that observes state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.watch_state()
    }

    /// Waits until the connection is open.
    ///
    /// # Errors
    ///
    /// See [`Connection::wait_open`].
    pub async fn wait_open(&self, wait: Duration) -> Result<()> {
        self.inner.connection.wait_open(wait).await
    }

    /// Applies a runtime connection option.
    pub fn set_option(&self, option: ConnectionOption) {
        self.inner.connection.set_option(option);
    }

    /// Returns `true` if both handles share one connection.
    #[inline]
    #[must_use]
    pub fn same_connection(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Shuts the connection down.
    ///
    /// Closes the socket, fails every outstanding command with
    /// [`Error::ConnectionClosed`] and ends all subscriptions. Idempotent.
    pub async fn kill(&self) {
        // Outstanding commands are failed below as closed, not lost.
        self.inner.connection.clear_handler();
        self.inner.connection.close().await;

        let failed = self.inner.dispatcher.fail_all(|| Error::ConnectionClosed);
        self.inner.subscriptions.clear();

        info!(endpoint = %self.endpoint(), failed, "Controller connection killed");
    }
}

// ============================================================================
// ControllerClient - Subscriptions
// ============================================================================

impl ControllerClient {
    /// Subscribes to changes of one input pin.
    pub fn register_input(&self, pin: impl Into<String>) -> Subscription {
        self.inner.subscriptions.register_input(pin)
    }

    /// Subscribes to changes of several input pins.
    pub fn register_multi_input<I, S>(&self, pins: I) -> Subscription
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.subscriptions.register_multi_input(pins)
    }

    /// Subscribes a getpin consumer.
    pub fn register_getpin(&self, pin: impl Into<String>) -> Subscription {
        self.inner.subscriptions.register_getpin(pin)
    }

    /// Subscribes an output consumer.
    pub fn register_output(&self, pin: impl Into<String>) -> Subscription {
        self.inner.subscriptions.register_output(pin)
    }

    /// Returns the number of live subscriptions.
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriptions.len()
    }
}

// ============================================================================
// ControllerClient - Commands
// ============================================================================

impl ControllerClient {
    /// Sends a command and returns a future for its reply.
    ///
    /// # Errors
    ///
    /// See [`CommandDispatcher::send_command`].
    pub fn send_command(&self, command: Command) -> Result<PendingReply> {
        self.inner.dispatcher.send_command(command)
    }

    /// Sends a command and invokes `callback` with the outcome.
    ///
    /// # Errors
    ///
    /// See [`CommandDispatcher::send_command_with`].
    pub fn send_command_with<F>(&self, command: Command, callback: F) -> Result<()>
    where
        F: FnOnce(Result<Reply>) + Send + 'static,
    {
        self.inner.dispatcher.send_command_with(command, callback)
    }

    /// Reads one pin.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownPin`] if the controller does not know `pin`
    /// - Any error from [`send_command`](Self::send_command) or the reply
    pub async fn get_pin(&self, pin: impl Into<String>) -> Result<PinValue> {
        self.send_command(Command::get_pin(pin))?.await?.into_pin()
    }

    /// Reads several pins, one command per pin.
    ///
    /// Waits for every reply. On failure the error of the first failing
    /// pin in request order is returned.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `pins` is empty; nothing is sent
    /// - otherwise same as [`get_pin`](Self::get_pin), for the first pin
    ///   that fails
    pub async fn get_pins<S: AsRef<str>>(&self, pins: &[S]) -> Result<BTreeMap<String, String>> {
        if pins.is_empty() {
            return Err(Error::invalid_argument("no pins to read"));
        }

        let sent: Vec<Result<PendingReply>> = pins
            .iter()
            .map(|pin| self.send_command(Command::get_pin(pin.as_ref())))
            .collect();

        let outcomes = join_all(sent.into_iter().map(|reply| async move {
            match reply {
                Ok(reply) => reply.await,
                Err(e) => Err(e),
            }
        }))
        .await;

        let mut values = BTreeMap::new();
        for outcome in outcomes {
            let pin = outcome?.into_pin()?;
            values.insert(pin.name, pin.value);
        }

        debug!(endpoint = %self.endpoint(), count = values.len(), "Read pins");
        Ok(values)
    }

    /// Writes `value` to an output pin and returns the acknowledgement.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `value` is null, an object or an array
    /// - [`Error::UnknownPin`] if the controller does not know `pin`
    pub async fn set_output(&self, pin: impl Into<String>, value: impl Into<Value>) -> Result<Value> {
        let command = Command::output(pin, value)?;
        Ok(self.send_command(command)?.await?.into_value())
    }

    /// Lists the controller's pins.
    ///
    /// # Errors
    ///
    /// Any error from [`send_command`](Self::send_command) or the reply.
    pub async fn list_pins(&self, force_update: bool) -> Result<Value> {
        Ok(self.send_command(Command::list(force_update))?.await?.into_value())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::transport::mock::{MockController, fast_options};

    async fn connected(mock: &MockController) -> ControllerClient {
        let client = ControllerClient::new(mock.endpoint(), fast_options());
        client.connect();
        client.wait_open(Duration::from_secs(5)).await.expect("open");
        client
    }

    #[tokio::test]
    async fn test_get_pin() -> anyhow::Result<()> {
        let mock = MockController::start().await;
        let client = connected(&mock).await;

        assert_eq!(client.get_pin("I_1").await?, PinValue::new("I_1", "1"));
        assert_eq!(client.status(), ConnectionStatus::Connected);
        Ok(())
    }

    #[tokio::test]
    async fn test_get_pins_aggregate() -> anyhow::Result<()> {
        let mock = MockController::start().await;
        mock.set_pin("A", "1");
        mock.set_pin("B", "0");
        let client = connected(&mock).await;

        let values = client.get_pins(&["A", "B"]).await?;
        assert_eq!(
            values,
            BTreeMap::from([("A".to_string(), "1".to_string()), ("B".to_string(), "0".to_string())])
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_get_pins_names_first_unknown() {
        let mock = MockController::start().await;
        mock.set_pin("A", "1");
        let client = connected(&mock).await;

        let err = client.get_pins(&["A", "B", "C"]).await.expect_err("unknown");
        assert!(matches!(err, Error::UnknownPin { ref pin } if pin == "B"));
    }

    #[tokio::test]
    async fn test_get_pins_rejects_empty_list() {
        let mock = MockController::start().await;
        let client = connected(&mock).await;

        let err = client.get_pins::<&str>(&[]).await.expect_err("empty");
        assert!(matches!(err, Error::InvalidArgument { .. }));
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_set_output() -> anyhow::Result<()> {
        let mock = MockController::start().await;
        let client = connected(&mock).await;

        assert_eq!(client.set_output("O_1", 1).await?, json!("OK"));
        assert_eq!(mock.pin("O_1").as_deref(), Some("1"));

        let err = client.set_output("O_9", 1).await.expect_err("unknown");
        assert!(matches!(err, Error::UnknownPin { ref pin } if pin == "O_9"));
        Ok(())
    }

    #[tokio::test]
    async fn test_list_pins() -> anyhow::Result<()> {
        let mock = MockController::start().await;
        let client = connected(&mock).await;

        assert_eq!(client.list_pins(true).await?, json!(["I_1", "I_2", "O_1"]));
        assert_eq!(mock.requests()[0]["params"], json!([true]));
        Ok(())
    }

    #[tokio::test]
    async fn test_push_reaches_subscription() {
        let mock = MockController::start().await;
        let client = connected(&mock).await;
        let mut input = client.register_input("I_2");

        mock.push_pin("I_2", "1");

        let message = tokio::time::timeout(Duration::from_secs(5), input.recv())
            .await
            .expect("delivered")
            .expect("open");
        assert_eq!(message.topic, "revpi/single/I_2");
        assert_eq!(message.payload, json!("1"));
    }

    #[tokio::test]
    async fn test_kill_fails_outstanding_and_ends_subscriptions() {
        let mock = MockController::start().await;
        mock.set_silent(true);
        let client = connected(&mock).await;
        let mut input = client.register_input("I_1");

        let reply = client.send_command(Command::get_pin("I_1")).unwrap();
        mock.wait_for_requests(1).await;

        client.kill().await;

        assert!(matches!(reply.await, Err(Error::ConnectionClosed)));
        assert!(input.recv().await.is_none());
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(matches!(
            client.send_command(Command::get_pin("I_1")),
            Err(Error::Disconnected)
        ));

        // Idempotent.
        client.kill().await;
    }

    #[tokio::test]
    async fn test_reconnect_keeps_subscriptions() {
        let mock = MockController::start().await;
        let client = connected(&mock).await;
        let mut input = client.register_input("I_1");

        mock.drop_connection();
        tokio::time::timeout(Duration::from_secs(5), async {
            while mock.sessions() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("reconnected");

        client.wait_open(Duration::from_secs(5)).await.expect("reopened");
        mock.push_pin("I_1", "0");

        let message = tokio::time::timeout(Duration::from_secs(5), input.recv())
            .await
            .expect("delivered")
            .expect("open");
        assert_eq!(message.payload, json!("0"));
    }
}
