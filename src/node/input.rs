//! Input pin nodes.
//!
//! Both nodes subscribe on creation, read their pins once on
//! [`start`](SingleInputNode::start), then forward every change the
//! controller pushes.

// ============================================================================
// Imports
// ============================================================================

use tracing::debug;

use crate::client::ControllerClient;
use crate::dispatch::{PinMessage, Subscription};
use crate::error::Error;

use super::{NodeOutput, Status, StatusLevel};

// ============================================================================
// SingleInputNode
// ============================================================================

/// Watches one input pin.
#[derive(Debug)]
pub struct SingleInputNode {
    client: ControllerClient,
    pin: String,
    subscription: Subscription,
}

impl SingleInputNode {
    /// Creates the node and subscribes to `pin`.
    pub fn new(client: ControllerClient, pin: impl Into<String>) -> Self {
        let pin = pin.into();
        let subscription = client.register_input(pin.clone());
        Self {
            client,
            pin,
            subscription,
        }
    }

    /// Returns the watched pin.
    #[inline]
    #[must_use]
    pub fn pin(&self) -> &str {
        &self.pin
    }

    /// Returns the status for the current connection state.
    #[must_use]
    pub fn status(&self) -> Status {
        Status::for_connection(self.client.status(), StatusLevel::Success)
    }

    /// Reads the pin once and emits its current value.
    pub async fn start(&self) -> NodeOutput {
        match self.client.get_pin(self.pin.as_str()).await {
            Ok(value) => NodeOutput::forward(PinMessage::single(&value)),
            Err(Error::UnknownPin { pin }) => NodeOutput::status_change(Status::unknown_pin(&pin)),
            Err(e) => {
                debug!(pin = %self.pin, error = %e, "Initial read skipped");
                NodeOutput::none()
            }
        }
    }

    /// Waits for the next pushed change.
    ///
    /// Returns `None` once the connection has been shut down.
    pub async fn next_message(&mut self) -> Option<PinMessage> {
        self.subscription.recv().await
    }
}

// ============================================================================
// MultipleInputNode
// ============================================================================

/// Watches several input pins and reports them together.
#[derive(Debug)]
pub struct MultipleInputNode {
    client: ControllerClient,
    pins: Vec<String>,
    subscription: Subscription,
}

impl MultipleInputNode {
    /// Creates the node for the space-separated pin names in `pins` and
    /// subscribes to them.
    pub fn new(client: ControllerClient, pins: &str) -> Self {
        let pins: Vec<String> = pins.split_whitespace().map(str::to_string).collect();
        let subscription = client.register_multi_input(pins.iter().cloned());
        Self {
            client,
            pins,
            subscription,
        }
    }

    /// Returns the watched pins in configuration order.
    #[inline]
    #[must_use]
    pub fn pins(&self) -> &[String] {
        &self.pins
    }

    /// Returns the status for the current connection state.
    #[must_use]
    pub fn status(&self) -> Status {
        Status::for_connection(self.client.status(), StatusLevel::Success)
    }

    /// Reads every pin and emits one aggregate message.
    ///
    /// If any pin is unknown, the first one in configuration order is
    /// reported and nothing is emitted. An empty configuration is reported
    /// as an unknown empty pin name.
    pub async fn start(&self) -> NodeOutput {
        if self.pins.is_empty() {
            return NodeOutput::status_change(Status::unknown_pin(""));
        }

        match self.client.get_pins(&self.pins).await {
            Ok(values) => NodeOutput::forward(PinMessage::multi(&values)),
            Err(Error::UnknownPin { pin }) => NodeOutput::status_change(Status::unknown_pin(&pin)),
            Err(e) => {
                debug!(pins = ?self.pins, error = %e, "Initial read skipped");
                NodeOutput::none()
            }
        }
    }

    /// Waits for the next pushed change of any watched pin.
    ///
    /// Returns `None` once the connection has been shut down.
    pub async fn next_message(&mut self) -> Option<PinMessage> {
        self.subscription.recv().await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use serde_json::json;
    use tokio::time::timeout;

    use crate::dispatch::MULTI_TOPIC;
    use crate::transport::mock::{MockController, fast_options};

    async fn connected(mock: &MockController) -> ControllerClient {
        let client = ControllerClient::new(mock.endpoint(), fast_options());
        client.connect();
        client.wait_open(Duration::from_secs(5)).await.expect("open");
        client
    }

    #[tokio::test]
    async fn test_single_input_start_and_push() {
        let mock = MockController::start().await;
        let client = connected(&mock).await;
        let mut node = SingleInputNode::new(client, "I_1");

        assert_eq!(node.status(), Status::success("Connected"));

        let output = node.start().await;
        assert_eq!(output.status, None);
        assert_eq!(
            output.message,
            Some(PinMessage {
                payload: json!("1"),
                topic: "revpi/single/I_1".to_string(),
            })
        );

        mock.push_pin("I_1", "0");
        let pushed = timeout(Duration::from_secs(5), node.next_message())
            .await
            .expect("pushed")
            .expect("open");
        assert_eq!(pushed.payload, json!("0"));
    }

    #[tokio::test]
    async fn test_single_input_unknown_pin() {
        let mock = MockController::start().await;
        let client = connected(&mock).await;
        let node = SingleInputNode::new(client, "I_9");

        let output = node.start().await;
        assert_eq!(output.status, Some(Status::error("UNKNOWN PIN: I_9!")));
        assert_eq!(output.message, None);
    }

    #[tokio::test]
    async fn test_single_input_disconnected() {
        let mock = MockController::start().await;
        let client = ControllerClient::new(mock.endpoint(), fast_options());
        let node = SingleInputNode::new(client, "I_1");

        assert_eq!(node.status(), Status::error("Disconnected"));
        assert_eq!(node.start().await, NodeOutput::none());
    }

    #[tokio::test]
    async fn test_multiple_input_aggregate() {
        let mock = MockController::start().await;
        mock.set_pin("A", "1");
        mock.set_pin("B", "0");
        let client = connected(&mock).await;
        let node = MultipleInputNode::new(client, "A B");

        assert_eq!(node.pins(), ["A", "B"]);

        let output = node.start().await;
        assert_eq!(
            output.message,
            Some(PinMessage {
                payload: json!({"A": "1", "B": "0"}),
                topic: MULTI_TOPIC.to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_multiple_input_unknown_pin() {
        let mock = MockController::start().await;
        mock.set_pin("A", "1");
        let client = connected(&mock).await;
        let node = MultipleInputNode::new(client, "A B");

        let output = node.start().await;
        assert_eq!(output.status, Some(Status::unknown_pin("B")));
        assert_eq!(output.message, None);
    }

    #[tokio::test]
    async fn test_multiple_input_without_pins() {
        let mock = MockController::start().await;
        let client = connected(&mock).await;
        let node = MultipleInputNode::new(client, "  ");

        assert!(node.pins().is_empty());
        let output = node.start().await;
        assert_eq!(output.status, Some(Status::error("UNKNOWN PIN: !")));
        assert_eq!(output.message, None);
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_multiple_input_push_shape() {
        let mock = MockController::start().await;
        let client = connected(&mock).await;
        let mut node = MultipleInputNode::new(client, "I_1  I_2");

        mock.push_pin("I_2", "1");
        let pushed = timeout(Duration::from_secs(5), node.next_message())
            .await
            .expect("pushed")
            .expect("open");
        assert_eq!(pushed.topic, MULTI_TOPIC);
        assert_eq!(pushed.payload, json!({"I_2": "1"}));
    }
}
