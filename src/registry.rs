//! Registry of shared controller connections.
//!
//! Maps each [`Endpoint`] to at most one live [`ControllerClient`]. All
//! consumers of an endpoint acquire the same client and so share one socket,
//! one pending table and one set of subscribers. A client that has closed
//! for good is replaced by the next `acquire`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           ConnectionRegistry            │
//! │  ┌─────────────────────────────────┐   │
//! │  │ revpi-a:8000 → ControllerClient │   │
//! │  │ revpi-b:8000 → ControllerClient │   │
//! │  │ revpi-b:8001 → ControllerClient │   │
//! │  └─────────────────────────────────┘   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The registry is an ordinary value: create one and pass it to whatever
//! needs connections.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use futures_util::future::join_all;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::client::ControllerClient;
use crate::error::Result;
use crate::identifiers::Endpoint;
use crate::transport::{ConnectionOptions, ConnectionState};

// ============================================================================
// ConnectionRegistry
// ============================================================================

/// Endpoint → connection map.
///
/// Thread-safe; concurrent `acquire` calls for one endpoint yield the same
/// client.
///
/// # Example
///
/// ```no_run
/// use revpi_link::{ConnectionRegistry, Endpoint};
///
/// # async fn example() -> revpi_link::Result<()> {
/// let registry = ConnectionRegistry::new();
/// let endpoint = Endpoint::new("revpi.local", 8000)?;
///
/// let a = registry.acquire(endpoint.clone());
/// let b = registry.acquire(endpoint.clone());
/// assert!(a.same_connection(&b));
///
/// registry.release(&endpoint).await;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionRegistry {
    /// Live clients by endpoint.
    clients: RwLock<FxHashMap<Endpoint, ControllerClient>>,

    /// Options for clients created by [`acquire`](Self::acquire).
    options: ConnectionOptions,
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.len())
            .field("options", &self.options)
            .finish()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// ConnectionRegistry - Constructor
// ============================================================================

impl ConnectionRegistry {
    /// Creates an empty registry with default connection options.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(FxHashMap::default()),
            options: ConnectionOptions::new(),
        }
    }

    /// Creates an empty registry whose new connections use `options`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if `options` are
    /// invalid.
    pub fn with_options(options: ConnectionOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            clients: RwLock::new(FxHashMap::default()),
            options,
        })
    }

    /// Returns the options used for new connections.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }
}

// ============================================================================
// ConnectionRegistry - Public API
// ============================================================================

impl ConnectionRegistry {
    /// Returns the client for `endpoint`, creating and connecting one if
    /// none exists or the existing one is closed.
    ///
    /// Must be called within a Tokio runtime.
    pub fn acquire(&self, endpoint: Endpoint) -> ControllerClient {
        self.get_or_create(endpoint, &self.options).0
    }

    /// Like [`acquire`](Self::acquire), but a newly created client uses
    /// `options`. An existing client is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if `options` are
    /// invalid.
    pub fn acquire_with(
        &self,
        endpoint: Endpoint,
        options: ConnectionOptions,
    ) -> Result<ControllerClient> {
        Ok(self.acquire_tracked(endpoint, options)?.0)
    }

    /// Like [`acquire_with`](Self::acquire_with), also reporting whether
    /// the client was created by this call.
    pub(crate) fn acquire_tracked(
        &self,
        endpoint: Endpoint,
        options: ConnectionOptions,
    ) -> Result<(ControllerClient, bool)> {
        options.validate()?;
        Ok(self.get_or_create(endpoint, &options))
    }

    /// Returns the client for `endpoint` without creating one.
    #[must_use]
    pub fn lookup(&self, endpoint: &Endpoint) -> Option<ControllerClient> {
        self.clients.read().get(endpoint).cloned()
    }

    /// Removes the client for `endpoint` and shuts it down.
    ///
    /// No-op if no client exists.
    pub async fn release(&self, endpoint: &Endpoint) {
        let removed = {
            let mut clients = self.clients.write();
            clients.remove(endpoint)
        };

        if let Some(client) = removed {
            client.kill().await;
            debug!(%endpoint, "Connection released");
        }
    }

    /// Releases `client` if it is still the one registered for its
    /// endpoint, then shuts it down either way.
    pub(crate) async fn release_client(&self, client: &ControllerClient) {
        let endpoint = client.endpoint();
        {
            let mut clients = self.clients.write();
            if clients.get(endpoint).is_some_and(|c| c.same_connection(client)) {
                clients.remove(endpoint);
            }
        }

        client.kill().await;
        debug!(%endpoint, "Connection released");
    }

    /// Releases every client.
    pub async fn shutdown(&self) {
        let clients: Vec<_> = {
            let mut map = self.clients.write();
            map.drain().map(|(_, client)| client).collect()
        };

        let count = clients.len();
        join_all(clients.iter().map(ControllerClient::kill)).await;

        info!(count, "ConnectionRegistry shut down");
    }

    /// Returns the number of live clients.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    /// Returns `true` if no clients are live.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}

// ============================================================================
// ConnectionRegistry - Internal
// ============================================================================

impl ConnectionRegistry {
    fn get_or_create(
        &self,
        endpoint: Endpoint,
        options: &ConnectionOptions,
    ) -> (ControllerClient, bool) {
        if let Some(client) = self.lookup(&endpoint) {
            if client.state() != ConnectionState::Closed {
                return (client, false);
            }
        }

        // Re-checked under the write lock; the first caller wins.
        let mut clients = self.clients.write();
        if let Some(client) = clients.get(&endpoint) {
            if client.state() != ConnectionState::Closed {
                return (client.clone(), false);
            }
            debug!(%endpoint, "Replacing closed connection");
        }

        let client = ControllerClient::new(endpoint.clone(), options.clone());
        client.connect();
        info!(%endpoint, can_reconnect = options.can_reconnect, "Connection created");

        clients.insert(endpoint, client.clone());
        (client, true)
    }
}

// ============================================================================
// Tests
// ============================================================================
