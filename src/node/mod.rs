//! Consumer behaviours built on a [`ControllerClient`].
//!
//! Each node holds a client handle and a subscription, and turns
//! controller replies into a display [`Status`] and [`PinMessage`]s.
//!
//! | Node | Trigger | Emits |
//! |------|---------|-------|
//! | [`SingleInputNode`] | start, push | `revpi/single/<pin>` |
//! | [`MultipleInputNode`] | start, push | `revpi/multi` |
//! | [`GetpinNode`] | input | `revpi/single/<pin>` |
//! | [`OutputNode`] | input | status only |
//!
//! [`ControllerClient`]: crate::ControllerClient
//! [`PinMessage`]: crate::dispatch::PinMessage

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::dispatch::PinMessage;
use crate::transport::ConnectionStatus;

// ============================================================================
// Submodules
// ============================================================================

/// On-demand pin reads.
pub mod getpin;

/// Input pin nodes.
pub mod input;

/// Output pin writes.
pub mod output;

// ============================================================================
// Re-exports
// ============================================================================

pub use getpin::GetpinNode;
pub use input::{MultipleInputNode, SingleInputNode};
pub use output::OutputNode;

// ============================================================================
// Status
// ============================================================================

/// Severity of a [`Status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    /// Healthy, emphasised.
    Success,
    /// Healthy.
    Info,
    /// Something is wrong.
    Error,
}

/// Display status of a node. Carries no behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Status {
    /// Severity.
    pub level: StatusLevel,
    /// Human-readable text.
    pub text: String,
}

impl Status {
    /// Creates a success status.
    #[inline]
    #[must_use]
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Success,
            text: text.into(),
        }
    }

    /// Creates an info status.
    #[inline]
    #[must_use]
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Info,
            text: text.into(),
        }
    }

    /// Creates an error status.
    #[inline]
    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Error,
            text: text.into(),
        }
    }

    /// Status for a connection: `Connected` at `connected_level`, or an
    /// error `Disconnected`.
    #[must_use]
    pub fn for_connection(status: ConnectionStatus, connected_level: StatusLevel) -> Self {
        match status {
            ConnectionStatus::Connected => Self {
                level: connected_level,
                text: "Connected".to_string(),
            },
            ConnectionStatus::Disconnected => Self::error("Disconnected"),
        }
    }

    /// Error status naming a pin the controller does not know.
    #[must_use]
    pub fn unknown_pin(pin: &str) -> Self {
        Self::error(format!("UNKNOWN PIN: {pin}!"))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

// ============================================================================
// NodeOutput
// ============================================================================

/// What a node produced in response to one trigger.
///
/// `None` fields leave the node's current status and the flow untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutput {
    /// New status, if it changed.
    pub status: Option<Status>,
    /// Message to forward, if any.
    pub message: Option<PinMessage>,
}

impl NodeOutput {
    /// Output with neither a status change nor a message.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Output that only changes the status.
    #[inline]
    #[must_use]
    pub fn status_change(status: Status) -> Self {
        Self {
            status: Some(status),
            message: None,
        }
    }

    /// Output that only forwards a message.
    #[inline]
    #[must_use]
    pub fn forward(message: PinMessage) -> Self {
        Self {
            status: None,
            message: Some(message),
        }
    }
}

/// Renders a scalar for status text; strings appear without quotes.
pub(crate) fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
