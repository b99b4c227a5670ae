//! Administrative pin listing.
//!
//! Answers "which pins does the controller at `host:port` have?" for
//! configuration tools. An existing connection to the endpoint is reused;
//! otherwise a temporary one is opened without reconnect and released once
//! the answer is in.
//!
//! Every failure collapses to JSON `false`, the answer the configuration
//! side expects for "no data".
//!
//! # Example
//!
//! ```no_run
//! use revpi_link::ConnectionRegistry;
//! use revpi_link::admin::{AdminQuery, list_pins};
//!
//! # async fn example() {
//! let registry = ConnectionRegistry::new();
//! if let Some(query) = AdminQuery::from_path("/revpi-server-list-pins/revpi.local/8000/true") {
//!     let answer = list_pins(&registry, &query).await;
//!     println!("{answer}");
//! }
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::identifiers::Endpoint;
use crate::registry::ConnectionRegistry;

// ============================================================================
// Constants
// ============================================================================

/// Route prefix of the list-pins query.
pub const LIST_PINS_ROUTE: &str = "/revpi-server-list-pins";

/// How long a temporary connection may take to open.
pub const TEMPORARY_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// AdminQuery
// ============================================================================

/// Parameters of a list-pins query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminQuery {
    /// Controller host, as given.
    pub host: String,
    /// Controller port, as given.
    pub port: String,
    /// Ask the controller to refresh its pin list first.
    pub force_update: bool,
}

impl AdminQuery {
    /// Creates a query.
    #[must_use]
    pub fn new(host: impl Into<String>, port: impl Into<String>, force_update: bool) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
            force_update,
        }
    }

    /// Parses `/revpi-server-list-pins/<host>/<port>/<force_update>`.
    ///
    /// Segments are percent-decoded. `force_update` is true for `true` or
    /// `1`. Returns `None` if the path has another shape.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        let rest = path.strip_prefix(LIST_PINS_ROUTE)?.strip_prefix('/')?;
        let segments: Vec<&str> = rest.trim_end_matches('/').split('/').collect();
        let [host, port, force_update] = segments.as_slice() else {
            return None;
        };

        let decode = |segment: &str| urlencoding::decode(segment).ok().map(|s| s.into_owned());
        let force_update = decode(force_update)?;

        Some(Self {
            host: decode(host)?,
            port: decode(port)?,
            force_update: matches!(force_update.trim(), "true" | "1"),
        })
    }

    /// Validates host and port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEndpoint`] if the host is shorter than two
    /// characters or the pair is not a valid endpoint.
    pub fn endpoint(&self) -> Result<Endpoint> {
        if self.host.trim().chars().count() < 2 {
            return Err(Error::invalid_endpoint(format!("host {:?} too short", self.host)));
        }
        Endpoint::parse(self.host.trim(), &self.port)
    }
}

// ============================================================================
// list_pins
// ============================================================================

/// Answers a list-pins query.
///
/// Returns the controller's listing, or `false` if the query is invalid or
/// anything fails along the way.
pub async fn list_pins(registry: &ConnectionRegistry, query: &AdminQuery) -> Value {
    match try_list_pins(registry, query).await {
        Ok(listing) => listing,
        Err(e) => {
            warn!(host = %query.host, port = %query.port, error = %e, "List pins failed");
            Value::Bool(false)
        }
    }
}

async fn try_list_pins(registry: &ConnectionRegistry, query: &AdminQuery) -> Result<Value> {
    let endpoint = query.endpoint()?;
    let options = registry.options().clone().with_can_reconnect(false);
    let (client, created) = registry.acquire_tracked(endpoint.clone(), options)?;

    if !created {
        debug!(%endpoint, "Listing pins over existing connection");
        return client.list_pins(query.force_update).await;
    }

    debug!(%endpoint, "Listing pins over temporary connection");
    let outcome = match client.wait_open(TEMPORARY_OPEN_TIMEOUT).await {
        Ok(()) => client.list_pins(query.force_update).await,
        Err(e) => Err(e),
    };

    registry.release_client(&client).await;
    outcome
}

// ============================================================================
// Tests
// ============================================================================
