//! WebSocket transport layer.
//!
//! This module handles the socket between the local end (Rust) and one
//! controller.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Connection     │         WebSocket            │  Controller     │
//! │  (event loop)   │◄────────────────────────────►│                 │
//! │  → Inbound      │      ws://host:port          │  pin server     │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Connection::new` - Create with [`ConnectionOptions`]
//! 2. `Connection::on_message` - Install the inbound handler
//! 3. `Connection::connect` - Spawn the event loop
//! 4. `Connection::send` - Write frames while `Open`
//! 5. `Connection::close` - Shut down (terminal)
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | WebSocket connection, reconnect policy and event loop |
//! | `options` | Connection options and runtime settings |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket connection and event loop.
pub mod connection;

/// Connection options.
pub mod options;

#[cfg(test)]
pub(crate) mod mock;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, ConnectionState, ConnectionStatus, InboundHandler};
pub use options::{ConnectionOption, ConnectionOptions};
