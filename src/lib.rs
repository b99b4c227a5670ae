//! RevPi Link - WebSocket connection layer for Revolution Pi controllers.
//!
//! This library keeps one shared WebSocket connection per controller and
//! lets any number of consumers read pins, write outputs and receive pin
//! changes over it.
//!
//! # Architecture
//!
//! ```text
//! ConnectionRegistry ──► ControllerClient ──► Connection ◄──► controller
//!   (endpoint → client)     │                   (event loop, reconnect)
//!                           ├── CommandDispatcher (pending commands)
//!                           └── SubscriptionRegistry (push routing)
//! ```
//!
//! Key design principles:
//!
//! - At most one live connection per `(host, port)`
//! - Each connection has a single I/O task that owns the socket
//! - Replies are matched by echoed request id, else FIFO per verb
//! - Inbound frames are decoded once, at the connection boundary
//!
//! # Quick Start
//!
//! ```no_run
//! use revpi_link::{ConnectionRegistry, Endpoint, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let registry = ConnectionRegistry::new();
//!     let client = registry.acquire(Endpoint::new("revpi.local", 8000)?);
//!
//!     // Read an input and switch an output
//!     let pin = client.get_pin("I_1").await?;
//!     println!("{} is {}", pin.name, pin.value);
//!     client.set_output("O_1", 1).await?;
//!
//!     registry.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`admin`] | List-pins administrative query |
//! | [`client`] | Shared per-endpoint handle: [`ControllerClient`] |
//! | [`dispatch`] | Command dispatch, pending replies, subscriptions |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | [`Endpoint`] and type-safe ID wrappers |
//! | [`node`] | Input, multi-input, getpin and output behaviours |
//! | [`protocol`] | Wire message types |
//! | [`registry`] | [`ConnectionRegistry`] |
//! | [`transport`] | WebSocket connection and reconnect loop |

// ============================================================================
// Modules
// ============================================================================

/// List-pins administrative query.
pub mod admin;

/// Shared per-endpoint handle.
pub mod client;

/// Command dispatch and inbound routing.
///
/// Tracks outstanding commands and routes replies and pushes.
pub mod dispatch;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Endpoint and identifier types.
pub mod identifiers;

/// Consumer behaviours.
pub mod node;

/// WebSocket protocol message types.
///
/// Outbound requests, inbound frames and decoded replies.
pub mod protocol;

/// Registry of shared connections.
pub mod registry;

/// WebSocket transport layer.
///
/// Connection lifecycle, reconnect policy and options.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Connection types
pub use client::ControllerClient;
pub use registry::ConnectionRegistry;
pub use transport::{ConnectionOption, ConnectionOptions, ConnectionState, ConnectionStatus};

// Dispatch types
pub use dispatch::{PendingReply, PinMessage, Subscription, SubscriptionKind};

// Node types
pub use node::{
    GetpinNode, MultipleInputNode, NodeOutput, OutputNode, SingleInputNode, Status, StatusLevel,
};

// Protocol types
pub use protocol::{Command, PinValue, Reply, Verb};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{Endpoint, RequestId, SubscriberId};
