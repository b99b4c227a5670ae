//! Inbound frame decoding.
//!
//! Every text frame from the controller is decoded into exactly one
//! [`Inbound`] variant at the connection boundary. Frames that fit none of
//! them are rejected as protocol errors instead of being half-processed.
//!
//! # Format
//!
//! ```json
//! { "cmd": "getpin", "msg": {"name": "I_1", "value": "1"}, "id": "uuid" }
//! { "cmd": "output", "msg": "OK" }
//! { "cmd": "list",   "msg": [ ... ] }
//! { "cmd": "input",  "msg": {"name": "I_1", "value": "0"} }
//! ```
//!
//! `id` is optional and only present when the controller echoes it. An
//! `id` that is not one of ours is ignored and the frame decodes as if it
//! had none.

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

use super::{PinValue, Verb};

// ============================================================================
// Constants
// ============================================================================

/// `cmd` value of unsolicited pin-change notifications.
pub const PUSH_CMD: &str = "input";

// ============================================================================
// Inbound
// ============================================================================

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply to a `getpin` or `output` command.
    CommandReply {
        /// Echoed request id, if the controller sends one.
        id: Option<RequestId>,
        /// Verb being answered.
        verb: Verb,
        /// Raw reply payload.
        payload: Value,
    },

    /// Unsolicited pin change.
    PushNotification(PinValue),

    /// Reply to a `list` command.
    ListResult {
        /// Echoed request id, if the controller sends one.
        id: Option<RequestId>,
        /// Opaque listing.
        payload: Value,
    },
}

#[derive(Deserialize)]
struct RawFrame {
    cmd: String,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    msg: Value,
}

impl RawFrame {
    fn request_id(&self) -> Option<RequestId> {
        let raw = self.id.as_ref().filter(|id| !id.is_null())?;
        match RequestId::deserialize(raw) {
            Ok(id) => Some(id),
            Err(_) => {
                trace!(id = %raw, "Ignoring unrecognised echoed id");
                None
            }
        }
    }
}

impl Inbound {
    /// Decodes a text frame.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the frame is not a JSON object with `cmd`
    /// - [`Error::Protocol`] if `cmd` is unknown or a push has no pin payload
    pub fn decode(text: &str) -> Result<Self> {
        let frame: RawFrame = serde_json::from_str(text)?;

        if frame.cmd == PUSH_CMD {
            let pin = PinValue::from_payload(&frame.msg)
                .map_err(|e| Error::protocol(format!("malformed push: {e}")))?;
            return Ok(Self::PushNotification(pin));
        }

        let id = frame.request_id();
        match frame.cmd.parse::<Verb>()? {
            Verb::List => Ok(Self::ListResult {
                id,
                payload: frame.msg,
            }),
            verb => Ok(Self::CommandReply {
                id,
                verb,
                payload: frame.msg,
            }),
        }
    }

    /// Returns the verb a reply answers, or `None` for a push.
    #[inline]
    #[must_use]
    pub const fn verb(&self) -> Option<Verb> {
        match self {
            Self::CommandReply { verb, .. } => Some(*verb),
            Self::ListResult { .. } => Some(Verb::List),
            Self::PushNotification(_) => None,
        }
    }

    /// Returns the echoed request id, if any.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> Option<RequestId> {
        match self {
            Self::CommandReply { id, .. } | Self::ListResult { id, .. } => *id,
            Self::PushNotification(_) => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
