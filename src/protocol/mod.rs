//! WebSocket protocol message types.
//!
//! This module defines the JSON text frames exchanged with the controller.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Request` | Client → Controller | Command request |
//! | `Inbound::CommandReply` | Controller → Client | `getpin` / `output` reply |
//! | `Inbound::ListResult` | Controller → Client | `list` reply |
//! | `Inbound::PushNotification` | Controller → Client | Unsolicited pin change |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `command` | Verbs and typed commands |
//! | `message` | Inbound frame decoding |
//! | `request` | Outbound requests and decoded replies |

// ============================================================================
// Submodules
// ============================================================================

/// Command verbs and typed commands.
pub mod command;

/// Inbound frame decoding.
pub mod message;

/// Request and reply message types.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{Command, Verb};
pub use message::{Inbound, PUSH_CMD};
pub use request::{PinValue, Reply, Request, UNKNOWN_PIN_SENTINEL};
