//! Writes an output pin each time an input message arrives.

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;
use tracing::{debug, warn};

use crate::client::ControllerClient;
use crate::dispatch::Subscription;
use crate::error::Error;

use super::{NodeOutput, Status, StatusLevel, display_value};

// ============================================================================
// OutputNode
// ============================================================================

/// Sets an output pin.
///
/// The value written is the payload of the triggering message, or with
/// `overwrite` set, the configured value.
#[derive(Debug)]
pub struct OutputNode {
    client: ControllerClient,
    pin: String,
    value: Value,
    overwrite: bool,
    _subscription: Subscription,
}

impl OutputNode {
    /// Creates the node and registers it for `pin`.
    pub fn new(
        client: ControllerClient,
        pin: impl Into<String>,
        value: impl Into<Value>,
        overwrite: bool,
    ) -> Self {
        let pin = pin.into();
        let subscription = client.register_output(pin.clone());
        Self {
            client,
            pin,
            value: value.into(),
            overwrite,
            _subscription: subscription,
        }
    }

    /// Returns the output pin.
    #[inline]
    #[must_use]
    pub fn pin(&self) -> &str {
        &self.pin
    }

    /// Returns the status for the current connection state.
    #[must_use]
    pub fn status(&self) -> Status {
        Status::for_connection(self.client.status(), StatusLevel::Info)
    }

    /// Handles one input message.
    ///
    /// Null, object and array values are not written.
    pub async fn on_input(&self, payload: &Value) -> NodeOutput {
        let value = if self.overwrite { &self.value } else { payload };
        if matches!(value, Value::Null | Value::Object(_) | Value::Array(_)) {
            debug!(pin = %self.pin, "Output value not a scalar, skipped");
            return NodeOutput::none();
        }

        let shown = display_value(value);
        match self.client.set_output(self.pin.as_str(), value.clone()).await {
            Ok(_) => NodeOutput::status_change(Status::info(format!(
                "Change - {} is {shown}",
                self.pin
            ))),
            Err(Error::UnknownPin { .. }) => {
                warn!(pin = %self.pin, value = %shown, "Controller rejected output");
                NodeOutput::status_change(Status::info(format!(
                    "Error setting {} to {shown}",
                    self.pin
                )))
            }
            Err(e) => {
                debug!(pin = %self.pin, error = %e, "Output failed");
                NodeOutput::none()
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
