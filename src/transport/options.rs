//! Connection options and runtime settings.
//!
//! [`ConnectionOptions`] is fixed when a connection is created;
//! [`ConnectionOption`] is the subset that can be changed afterwards via
//! `set_option`.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use revpi_link::ConnectionOptions;
//!
//! let options = ConnectionOptions::new()
//!     .with_reconnect_delay(Duration::from_millis(500))
//!     .with_command_timeout(Some(Duration::from_secs(5)));
//! options.validate()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde_json::Value;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Initial delay before the first reconnect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for the exponential reconnect backoff.
pub const DEFAULT_MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Default time to wait for a command reply.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum outstanding commands per connection.
pub const DEFAULT_MAX_PENDING: usize = 100;

// ============================================================================
// ConnectionOptions
// ============================================================================

/// Per-connection configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Reconnect automatically after the socket drops.
    pub can_reconnect: bool,

    /// Delay before the first reconnect attempt; doubles on each failure.
    pub reconnect_delay: Duration,

    /// Cap for the reconnect delay.
    pub max_reconnect_delay: Duration,

    /// Time to wait for a reply once it is awaited. `None` waits forever.
    pub command_timeout: Option<Duration>,

    /// Maximum number of commands awaiting a reply.
    pub max_pending: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ConnectionOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            can_reconnect: true,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_delay: DEFAULT_MAX_RECONNECT_DELAY,
            command_timeout: Some(DEFAULT_COMMAND_TIMEOUT),
            max_pending: DEFAULT_MAX_PENDING,
        }
    }

    /// Creates options for a short-lived connection that never reconnects.
    #[inline]
    #[must_use]
    pub fn temporary() -> Self {
        Self {
            can_reconnect: false,
            ..Self::new()
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ConnectionOptions {
    /// Enables or disables automatic reconnection.
    #[inline]
    #[must_use]
    pub fn with_can_reconnect(mut self, can_reconnect: bool) -> Self {
        self.can_reconnect = can_reconnect;
        self
    }

    /// Sets the initial reconnect delay.
    #[inline]
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the reconnect delay cap.
    #[inline]
    #[must_use]
    pub fn with_max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.max_reconnect_delay = delay;
        self
    }

    /// Sets the command reply timeout.
    #[inline]
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the maximum number of outstanding commands.
    #[inline]
    #[must_use]
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ConnectionOptions {
    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a delay or limit is zero, or the
    /// reconnect delay exceeds its cap.
    pub fn validate(&self) -> Result<()> {
        if self.reconnect_delay.is_zero() {
            return Err(Error::config("reconnect_delay must be greater than zero"));
        }
        if self.max_reconnect_delay < self.reconnect_delay {
            return Err(Error::config(
                "max_reconnect_delay must not be smaller than reconnect_delay",
            ));
        }
        if self.command_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::config("command_timeout must be greater than zero"));
        }
        if self.max_pending == 0 {
            return Err(Error::config("max_pending must be greater than zero"));
        }
        Ok(())
    }

    /// Returns the delay before reconnect attempt number `attempt` (0-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.reconnect_delay
            .saturating_mul(factor)
            .min(self.max_reconnect_delay)
    }
}

// ============================================================================
// ConnectionOption
// ============================================================================

/// A setting that can be changed on a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOption {
    /// When `false`, a socket close moves the connection straight to
    /// `Closed` instead of reconnecting.
    CanReconnect(bool),
}

impl ConnectionOption {
    /// Parses an option from its name and a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for unknown names or values of
    /// the wrong type.
    pub fn from_name_value(name: &str, value: &Value) -> Result<Self> {
        match name {
            "canReconnect" | "can_reconnect" => value
                .as_bool()
                .map(Self::CanReconnect)
                .ok_or_else(|| {
                    Error::invalid_argument(format!("{name} expects a boolean, got {value}"))
                }),
            other => Err(Error::invalid_argument(format!("Unknown option: {other}"))),
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
    fn test_defaults() {
        let options = ConnectionOptions::default();
        assert!(options.can_reconnect);
        assert_eq!(options.reconnect_delay, DEFAULT_RECONNECT_DELAY);
        assert_eq!(options.command_timeout, Some(DEFAULT_COMMAND_TIMEOUT));
        assert_eq!(options.max_pending, DEFAULT_MAX_PENDING);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_temporary() {
        assert!(!ConnectionOptions::temporary().can_reconnect);
    }

    #[test]
    fn test_validate() {
        let zero_delay = ConnectionOptions::new().with_reconnect_delay(Duration::ZERO);
        assert!(zero_delay.validate().is_err());

        let inverted = ConnectionOptions::new()
            .with_reconnect_delay(Duration::from_secs(10))
            .with_max_reconnect_delay(Duration::from_secs(1));
        assert!(inverted.validate().is_err());

        let zero_timeout = ConnectionOptions::new().with_command_timeout(Some(Duration::ZERO));
        assert!(zero_timeout.validate().is_err());

        let no_timeout = ConnectionOptions::new().with_command_timeout(None);
        assert!(no_timeout.validate().is_ok());

        assert!(ConnectionOptions::new().with_max_pending(0).validate().is_err());
    }

    #[test]
    fn test_backoff_is_capped_exponential() {
        let options = ConnectionOptions::new()
            .with_reconnect_delay(Duration::from_millis(100))
            .with_max_reconnect_delay(Duration::from_millis(1000));

        assert_eq!(options.backoff(0), Duration::from_millis(100));
        assert_eq!(options.backoff(1), Duration::from_millis(200));
        assert_eq!(options.backoff(3), Duration::from_millis(800));
        assert_eq!(options.backoff(4), Duration::from_millis(1000));
        assert_eq!(options.backoff(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn test_option_from_name_value() {
        assert_eq!(
            ConnectionOption::from_name_value("canReconnect", &json!(false)).unwrap(),
            ConnectionOption::CanReconnect(false)
        );
        assert!(ConnectionOption::from_name_value("canReconnect", &json!("no")).is_err());
        assert!(ConnectionOption::from_name_value("keepAlive", &json!(true)).is_err());
    }
}
