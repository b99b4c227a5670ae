//! Reads a pin each time an input message arrives.

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;
use tracing::debug;

use crate::client::ControllerClient;
use crate::dispatch::{PinMessage, Subscription};
use crate::error::Error;

use super::{NodeOutput, Status, StatusLevel, display_value};

// ============================================================================
// GetpinNode
// ============================================================================

/// Reads a pin on demand.
///
/// The pin is the configured one, or with `overwrite` set, the payload of
/// the triggering message.
#[derive(Debug)]
pub struct GetpinNode {
    client: ControllerClient,
    pin: Option<String>,
    overwrite: bool,
    subscription: Option<Subscription>,
}

impl GetpinNode {
    /// Creates the node and subscribes to the configured pin.
    ///
    /// An empty pin name counts as no pin; nothing is subscribed then.
    pub fn new(client: ControllerClient, pin: Option<String>, overwrite: bool) -> Self {
        let pin = pin.filter(|name| !name.is_empty());
        let subscription = pin.as_deref().map(|name| client.register_getpin(name));
        Self {
            client,
            pin,
            overwrite,
            subscription,
        }
    }

    /// Returns the status for the current connection state.
    #[must_use]
    pub fn status(&self) -> Status {
        Status::for_connection(self.client.status(), StatusLevel::Info)
    }

    /// Handles one input message.
    ///
    /// Does nothing when no pin name can be determined.
    pub async fn on_input(&self, payload: &Value) -> NodeOutput {
        let Some(pin) = self.target(payload) else {
            debug!("Getpin input without pin name skipped");
            return NodeOutput::none();
        };

        match self.client.get_pin(pin.as_str()).await {
            Ok(value) => NodeOutput {
                status: Some(Status::info(format!(
                    "Connected - {} is {}",
                    value.name, value.value
                ))),
                message: Some(PinMessage::single(&value)),
            },
            Err(Error::UnknownPin { pin }) => NodeOutput::status_change(Status::unknown_pin(&pin)),
            Err(e) => {
                debug!(%pin, error = %e, "Getpin failed");
                NodeOutput::none()
            }
        }
    }

    /// Waits for the next pushed change of the configured pin.
    ///
    /// Returns `None` once the connection has been shut down, or at once
    /// if no pin is configured.
    pub async fn next_message(&mut self) -> Option<PinMessage> {
        match self.subscription.as_mut() {
            Some(subscription) => subscription.recv().await,
            None => None,
        }
    }

    fn target(&self, payload: &Value) -> Option<String> {
        if !self.overwrite {
            return self.pin.clone();
        }
        match payload {
            Value::Null | Value::Object(_) | Value::Array(_) => None,
            scalar => Some(display_value(scalar)),
        }
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

    use crate::transport::mock::{MockController, fast_options};

    async fn connected(mock: &MockController) -> ControllerClient {
        let client = ControllerClient::new(mock.endpoint(), fast_options());
        client.connect();
        client.wait_open(Duration::from_secs(5)).await.expect("open");
        client
    }

    #[tokio::test]
    async fn test_configured_pin() {
        let mock = MockController::start().await;
        let client = connected(&mock).await;
        let node = GetpinNode::new(client, Some("I_2".into()), false);

        assert_eq!(node.status(), Status::info("Connected"));

        let output = node.on_input(&json!("ignored")).await;
        assert_eq!(output.status, Some(Status::info("Connected - I_2 is 0")));
        assert_eq!(
            output.message,
            Some(PinMessage {
                payload: json!("0"),
                topic: "revpi/single/I_2".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_overwrite_uses_payload() {
        let mock = MockController::start().await;
        let client = connected(&mock).await;
        let node = GetpinNode::new(client, Some("I_2".into()), true);

        let output = node.on_input(&json!("I_1")).await;
        assert_eq!(output.status, Some(Status::info("Connected - I_1 is 1")));
        assert_eq!(mock.requests()[0]["params"], json!(["I_1"]));
    }

    #[tokio::test]
    async fn test_unknown_pin() {
        let mock = MockController::start().await;
        let client = connected(&mock).await;
        let node = GetpinNode::new(client, Some("X_1".into()), false);

        let output = node.on_input(&Value::Null).await;
        assert_eq!(output.status, Some(Status::error("UNKNOWN PIN: X_1!")));
        assert_eq!(output.message, None);
    }

    #[tokio::test]
    async fn test_missing_pin_is_skipped() {
        let mock = MockController::start().await;
        let client = connected(&mock).await;

        let unconfigured = GetpinNode::new(client.clone(), None, false);
        assert_eq!(unconfigured.on_input(&json!("I_1")).await, NodeOutput::none());

        let overwrite = GetpinNode::new(client.clone(), None, true);
        assert_eq!(overwrite.on_input(&Value::Null).await, NodeOutput::none());

        assert!(mock.requests().is_empty());
        assert_eq!(client.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_pin_is_not_subscribed() {
        let mock = MockController::start().await;
        let client = connected(&mock).await;
        let mut node = GetpinNode::new(client.clone(), Some(String::new()), false);

        assert_eq!(client.subscriber_count(), 0);
        assert_eq!(node.on_input(&json!("I_1")).await, NodeOutput::none());
        assert_eq!(node.next_message().await, None);
        assert!(mock.requests().is_empty());
    }
}
