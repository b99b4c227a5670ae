//! Command dispatch and inbound routing.
//!
//! Sits between consumers and a [`Connection`](crate::transport::Connection):
//!
//! ```text
//! send_command ──► CommandDispatcher ──► PendingTable ──► Connection::send
//!                                             ▲
//! Connection ──► Inbound ──► SubscriptionRegistry::route
//!                                   │
//!                                   └──► Subscription (push data)
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `dispatcher` | Command submission and reply futures |
//! | `pending` | Outstanding commands and reply matching |
//! | `subscription` | Subscribers and inbound routing |

// ============================================================================
// Submodules
// ============================================================================

/// Command submission.
pub mod dispatcher;

/// Outstanding commands.
pub mod pending;

/// Subscribers and inbound routing.
pub mod subscription;

// ============================================================================
// Re-exports
// ============================================================================

pub use dispatcher::{CommandDispatcher, PendingReply};
pub use pending::{PendingCommand, PendingTable, SharedPending};
pub use subscription::{
    MULTI_TOPIC, PinMessage, SINGLE_TOPIC_PREFIX, SUBSCRIBER_BUFFER, Subscription, SubscriptionKind,
    SubscriptionRegistry,
};
