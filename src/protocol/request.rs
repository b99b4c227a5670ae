//! Request and reply message types.
//!
//! Outbound commands are serialized as [`Request`]; decoded replies are
//! handed to callers as [`Reply`].

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

use super::{Command, Verb};

// ============================================================================
// Constants
// ============================================================================

/// Reply value meaning "pin name not recognized by the controller".
pub const UNKNOWN_PIN_SENTINEL: &str = "ERROR_UNKNOWN";

// ============================================================================
// Request
// ============================================================================

/// A command request from client to controller.
///
/// # Format
///
/// ```json
/// {
///   "id": "uuid",
///   "cmd": "getpin",
///   "params": ["I_1"]
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    /// Identifier the controller may echo back for correlation.
    pub id: RequestId,

    /// Command verb.
    pub cmd: Verb,

    /// Positional parameters.
    pub params: Vec<Value>,
}

impl Request {
    /// Creates a request for `command` with an auto-generated ID.
    #[inline]
    #[must_use]
    pub fn new(command: &Command) -> Self {
        Self::with_id(RequestId::generate(), command)
    }

    /// Creates a request for `command` with a specific ID.
    #[inline]
    #[must_use]
    pub fn with_id(id: RequestId, command: &Command) -> Self {
        Self {
            id,
            cmd: command.verb(),
            params: command.params(),
        }
    }

    /// Serializes the request into a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// PinValue
// ============================================================================

/// A pin name with its current value.
///
/// Numeric and boolean values on the wire are normalised to strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinValue {
    /// Pin name.
    pub name: String,

    /// Pin value as reported by the controller.
    #[serde(deserialize_with = "scalar_as_string")]
    pub value: String,
}

impl PinValue {
    /// Creates a pin value.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Returns `true` if the value is the unknown-pin sentinel.
    #[inline]
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.value == UNKNOWN_PIN_SENTINEL
    }

    /// Decodes a pin payload.
    ///
    /// The payload is either a JSON object or a string holding an encoded
    /// JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the payload has no `name`/`value` pair.
    pub fn from_payload(payload: &Value) -> Result<Self> {
        match payload {
            Value::String(encoded) => Ok(serde_json::from_str(encoded)?),
            other => Ok(Self::deserialize(other)?),
        }
    }
}

fn scalar_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "pin value must be a scalar, got {other}"
        ))),
    }
}

// ============================================================================
// Reply
// ============================================================================

/// A decoded command reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Reply to `getpin`.
    Pin(PinValue),
    /// Acknowledgement of `output`.
    Ack(Value),
    /// Result of `list`, passed through opaquely.
    List(Value),
}

impl Reply {
    /// Decodes the raw payload of a reply to `command`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownPin`] if the controller answered with the sentinel
    /// - [`Error::Json`] if a `getpin` payload is malformed
    pub fn decode(command: &Command, payload: Value) -> Result<Self> {
        match command {
            Command::GetPin { .. } => {
                let pin = PinValue::from_payload(&payload)?;
                if pin.is_unknown() {
                    return Err(Error::unknown_pin(pin.name));
                }
                Ok(Self::Pin(pin))
            }
            Command::Output { pin, .. } => {
                if payload.as_str() == Some(UNKNOWN_PIN_SENTINEL) {
                    return Err(Error::unknown_pin(pin.clone()));
                }
                Ok(Self::Ack(payload))
            }
            Command::List { .. } => Ok(Self::List(payload)),
        }
    }

    /// Returns the verb this reply answers.
    #[inline]
    #[must_use]
    pub const fn verb(&self) -> Verb {
        match self {
            Self::Pin(_) => Verb::GetPin,
            Self::Ack(_) => Verb::Output,
            Self::List(_) => Verb::List,
        }
    }

    /// Extracts the pin value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if this is not a `getpin` reply.
    pub fn into_pin(self) -> Result<PinValue> {
        match self {
            Self::Pin(pin) => Ok(pin),
            other => Err(Error::protocol(format!(
                "expected getpin reply, got {}",
                other.verb()
            ))),
        }
    }

    /// Extracts the raw payload of an `output` or `list` reply.
    ///
    /// A `getpin` reply is re-encoded as `{name, value}`.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Pin(pin) => serde_json::json!({ "name": pin.name, "value": pin.value }),
            Self::Ack(value) | Self::List(value) => value,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let request = Request::new(&Command::get_pin("I_1"));
        let json: Value = serde_json::from_str(&request.to_frame().unwrap()).unwrap();

        assert_eq!(json["cmd"], "getpin");
        assert_eq!(json["params"], json!(["I_1"]));
        assert_eq!(json["id"], request.id.to_string());
    }

    #[test]
    fn test_pin_from_object_and_encoded_string() {
        let object = json!({"name": "I_1", "value": "5"});
        let encoded = json!(r#"{"name":"I_1","value":"5"}"#);

        assert_eq!(PinValue::from_payload(&object).unwrap(), PinValue::new("I_1", "5"));
        assert_eq!(PinValue::from_payload(&encoded).unwrap(), PinValue::new("I_1", "5"));
    }

    #[test]
    fn test_pin_value_normalises_scalars() {
        let pin = PinValue::from_payload(&json!({"name": "AI_1", "value": 1234})).unwrap();
        assert_eq!(pin.value, "1234");

        let pin = PinValue::from_payload(&json!({"name": "I_2", "value": true})).unwrap();
        assert_eq!(pin.value, "true");

        assert!(PinValue::from_payload(&json!({"name": "I_3", "value": [1]})).is_err());
        assert!(PinValue::from_payload(&json!({"value": "1"})).is_err());
    }

    #[test]
    fn test_decode_getpin_unknown() {
        let err = Reply::decode(
            &Command::get_pin("Y"),
            json!({"name": "Y", "value": UNKNOWN_PIN_SENTINEL}),
        )
        .unwrap_err();

        assert!(matches!(err, Error::UnknownPin { ref pin } if pin == "Y"));
    }

    #[test]
    fn test_decode_output() {
        let command = Command::output("O_1", 1).unwrap();

        let ack = Reply::decode(&command, json!("OK")).unwrap();
        assert_eq!(ack, Reply::Ack(json!("OK")));

        let err = Reply::decode(&command, json!(UNKNOWN_PIN_SENTINEL)).unwrap_err();
        assert!(matches!(err, Error::UnknownPin { ref pin } if pin == "O_1"));
    }

    #[test]
    fn test_decode_list_is_opaque() {
        let listing = json!([{"name": "I_1"}, {"name": "O_1"}]);
        let reply = Reply::decode(&Command::list(false), listing.clone()).unwrap();
        assert_eq!(reply.into_value(), listing);
    }

    #[test]
    fn test_into_pin_wrong_kind() {
        let reply = Reply::Ack(json!("OK"));
        assert!(reply.into_pin().is_err());
    }
}
