//! Type-safe identifiers.
//!
//! Newtype wrappers keep endpoint keys, request ids and subscriber ids
//! from being mixed up.
//!
//! | Type | Wraps | Used for |
//! |------|-------|----------|
//! | [`Endpoint`] | host + port | Connection sharing key |
//! | [`RequestId`] | UUID v4 | Reply correlation |
//! | [`SubscriberId`] | `u64` counter | Subscription bookkeeping |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::{Error, Result};

// ============================================================================
// Endpoint
// ============================================================================

/// A controller endpoint: one `(host, port)` pair.
///
/// Two endpoints are equal iff host and port are equal. The host is
/// compared as given, without case folding or DNS resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Creates an endpoint after checking it forms a valid `ws://` URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEndpoint`] if the host is empty, the port is
    /// zero, or the pair does not form a valid URL.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();

        if host.trim().is_empty() {
            return Err(Error::invalid_endpoint("host is empty"));
        }
        if port == 0 {
            return Err(Error::invalid_endpoint("port must be non-zero"));
        }

        let url = Url::parse(&format!("ws://{host}:{port}"))
            .map_err(|e| Error::invalid_endpoint(format!("{host}:{port}: {e}")))?;
        if url.host_str().is_none() {
            return Err(Error::invalid_endpoint(format!("{host}:{port}: no host")));
        }

        Ok(Self { host, port })
    }

    /// Parses an endpoint from untyped host and port strings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEndpoint`] if the port is not a number or
    /// [`Endpoint::new`] rejects the pair.
    pub fn parse(host: &str, port: &str) -> Result<Self> {
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|e| Error::invalid_endpoint(format!("port {port:?}: {e}")))?;
        Self::new(host, port)
    }

    /// Returns the host.
    #[inline]
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    #[inline]
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the WebSocket URL for this endpoint.
    ///
    /// Format: `ws://{host}:{port}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ============================================================================
// RequestId
// ============================================================================

/// Identifier attached to every outbound command.
///
/// Controllers that echo it get id-based reply matching; others fall back
/// to FIFO matching per verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generates a new random request id.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[inline]
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// ============================================================================
// SubscriberId
// ============================================================================

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier for one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Allocates the next subscriber id.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_endpoint_ws_url() {
        let endpoint = Endpoint::new("revpi.local", 8000).expect("valid endpoint");
        assert_eq!(endpoint.ws_url(), "ws://revpi.local:8000");
        assert_eq!(endpoint.to_string(), "revpi.local:8000");
    }

    #[test]
    fn test_endpoint_rejects_bad_input() {
        assert!(Endpoint::new("", 8000).is_err());
        assert!(Endpoint::new("revpi", 0).is_err());
        assert!(Endpoint::new("bad host", 8000).is_err());
        assert!(Endpoint::parse("revpi", "http").is_err());
        assert!(Endpoint::parse("revpi", "70000").is_err());
    }

    #[test]
    fn test_endpoint_parse() {
        let endpoint = Endpoint::parse("10.0.0.5", " 8000 ").expect("valid endpoint");
        assert_eq!(endpoint.host(), "10.0.0.5");
        assert_eq!(endpoint.port(), 8000);
    }

    #[test]
    fn test_subscriber_ids_are_unique() {
        let a = SubscriberId::next();
        let b = SubscriberId::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_request_id_serializes_as_string() {
        let id = RequestId::generate();
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, format!("\"{id}\""));
    }

    proptest! {
        #[test]
        fn endpoint_equality_follows_host_and_port(
            host_a in "[a-z]{2,8}",
            host_b in "[a-z]{2,8}",
            port_a in 1u16..,
            port_b in 1u16..,
        ) {
            let a = Endpoint::new(host_a.clone(), port_a).unwrap();
            let b = Endpoint::new(host_b.clone(), port_b).unwrap();
            prop_assert_eq!(a == b, host_a == host_b && port_a == port_b);
        }
    }
}
