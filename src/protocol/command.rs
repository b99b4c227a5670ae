//! Command verbs understood by the controller.
//!
//! | Verb | Params | Reply |
//! |------|--------|-------|
//! | `getpin` | `[pin]` | `{name, value}` |
//! | `output` | `[pin, value]` | acknowledgement or `ERROR_UNKNOWN` |
//! | `list` | `[force_update]` | opaque pin listing |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

// ============================================================================
// Verb
// ============================================================================

/// Wire-level command verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    /// Read one pin.
    #[serde(rename = "getpin")]
    GetPin,
    /// Write one output pin.
    Output,
    /// List available pins.
    List,
}

impl Verb {
    /// Returns the wire name of the verb.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::GetPin => "getpin",
            Self::Output => "output",
            Self::List => "list",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "getpin" => Ok(Self::GetPin),
            "output" => Ok(Self::Output),
            "list" => Ok(Self::List),
            other => Err(Error::protocol(format!("Unknown verb: {other}"))),
        }
    }
}

// ============================================================================
// Command
// ============================================================================

/// A command with its typed arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Read the current value of `pin`.
    GetPin {
        /// Pin name.
        pin: String,
    },

    /// Set output `pin` to `value`.
    Output {
        /// Pin name.
        pin: String,
        /// Scalar value to write.
        value: Value,
    },

    /// List the pins the controller exposes.
    List {
        /// Ask the controller to rebuild its pin table first.
        force_update: bool,
    },
}

impl Command {
    /// Creates a `getpin` command.
    #[inline]
    #[must_use]
    pub fn get_pin(pin: impl Into<String>) -> Self {
        Self::GetPin { pin: pin.into() }
    }

    /// Creates an `output` command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `value` is null, an object or
    /// an array. Only scalars can be written to a pin.
    pub fn output(pin: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        let value = value.into();
        if value.is_null() || value.is_object() || value.is_array() {
            return Err(Error::invalid_argument(format!(
                "output value must be a scalar, got {value}"
            )));
        }
        Ok(Self::Output {
            pin: pin.into(),
            value,
        })
    }

    /// Creates a `list` command.
    #[inline]
    #[must_use]
    pub const fn list(force_update: bool) -> Self {
        Self::List { force_update }
    }

    /// Returns the verb of this command.
    #[inline]
    #[must_use]
    pub const fn verb(&self) -> Verb {
        match self {
            Self::GetPin { .. } => Verb::GetPin,
            Self::Output { .. } => Verb::Output,
            Self::List { .. } => Verb::List,
        }
    }

    /// Returns the pin this command targets, if any.
    #[inline]
    #[must_use]
    pub fn pin(&self) -> Option<&str> {
        match self {
            Self::GetPin { pin } | Self::Output { pin, .. } => Some(pin),
            Self::List { .. } => None,
        }
    }

    /// Returns the positional wire parameters.
    #[must_use]
    pub fn params(&self) -> Vec<Value> {
        match self {
            Self::GetPin { pin } => vec![Value::String(pin.clone())],
            Self::Output { pin, value } => vec![Value::String(pin.clone()), value.clone()],
            Self::List { force_update } => vec![Value::Bool(*force_update)],
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
