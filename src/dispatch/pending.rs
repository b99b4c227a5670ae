//! Outstanding commands awaiting a reply.
//!
//! Commands are kept in submission order. A reply that echoes a request id
//! resolves that exact command; a reply without one resolves the oldest
//! command with the same verb, or for `getpin`, the oldest one for the pin
//! it names.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::trace;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{Command, Reply, Verb};

// ============================================================================
// Types
// ============================================================================

/// Single-use channel that delivers a command's outcome.
pub(crate) type ReplySender = oneshot::Sender<Result<Reply>>;

/// Pending table shared by the dispatcher and the router.
pub type SharedPending = Arc<Mutex<PendingTable>>;

// ============================================================================
// PendingCommand
// ============================================================================

/// A command that has been written and not yet answered.
///
/// Resolving or failing consumes it, so its outcome is delivered at most
/// once.
#[derive(Debug)]
pub struct PendingCommand {
    id: RequestId,
    command: Command,
    submitted_at: Instant,
    reply_tx: ReplySender,
}

impl PendingCommand {
    pub(crate) fn new(id: RequestId, command: Command, reply_tx: ReplySender) -> Self {
        Self {
            id,
            command,
            submitted_at: Instant::now(),
            reply_tx,
        }
    }

    /// Returns the request id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Returns the command.
    #[inline]
    #[must_use]
    pub fn command(&self) -> &Command {
        &self.command
    }

    /// Returns how long the command has been outstanding.
    #[inline]
    #[must_use]
    pub fn age(&self) -> Duration {
        self.submitted_at.elapsed()
    }

    /// Decodes `payload` against the command and delivers the outcome.
    pub(crate) fn resolve(self, payload: Value) {
        let outcome = Reply::decode(&self.command, payload);
        self.deliver(outcome);
    }

    /// Delivers `error` as the outcome.
    pub(crate) fn fail(self, error: Error) {
        self.deliver(Err(error));
    }

    fn deliver(self, outcome: Result<Reply>) {
        if self.reply_tx.send(outcome).is_err() {
            trace!(id = %self.id, verb = %self.command.verb(), "Reply dropped, caller gone");
        }
    }
}

// ============================================================================
// PendingTable
// ============================================================================

/// How long a timed-out command keeps its place for a late reply.
const EXPIRED_RETENTION: Duration = Duration::from_secs(60);

/// Most timed-out commands kept at once.
const MAX_EXPIRED: usize = 64;

/// One position in the submission order.
#[derive(Debug)]
enum Slot {
    Live(PendingCommand),
    /// A command whose caller gave up. Its reply is still owed.
    Expired {
        id: RequestId,
        verb: Verb,
        pin: Option<String>,
        since: Instant,
    },
}

impl Slot {
    fn id(&self) -> RequestId {
        match self {
            Self::Live(command) => command.id,
            Self::Expired { id, .. } => *id,
        }
    }

    fn verb(&self) -> Verb {
        match self {
            Self::Live(command) => command.command.verb(),
            Self::Expired { verb, .. } => *verb,
        }
    }

    fn pin(&self) -> Option<&str> {
        match self {
            Self::Live(command) => command.command.pin(),
            Self::Expired { pin, .. } => pin.as_deref(),
        }
    }

    fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }
}

/// What an inbound reply belongs to.
#[derive(Debug)]
pub(crate) enum Match {
    /// A command still waiting for its reply.
    Command(PendingCommand),
    /// A command that already timed out; the reply is stale.
    Expired(RequestId),
    /// Nothing was sent that this reply could answer.
    Unmatched,
}

/// Ordered collection of [`PendingCommand`]s for one connection.
///
/// A command that times out keeps its slot for a while, so the late reply
/// to it is absorbed instead of resolving the next command of that verb.
#[derive(Debug, Default)]
pub struct PendingTable {
    slots: VecDeque<Slot>,
}

impl PendingTable {
    /// Creates an empty table.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty shared table.
    #[inline]
    #[must_use]
    pub fn shared() -> SharedPending {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Returns the number of outstanding commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_live()).count()
    }

    /// Returns `true` if nothing is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.slots.iter().any(Slot::is_live)
    }

    /// Returns the age of the oldest outstanding command.
    #[must_use]
    pub fn oldest_age(&self) -> Option<Duration> {
        self.slots.iter().find_map(|slot| match slot {
            Slot::Live(command) => Some(command.age()),
            Slot::Expired { .. } => None,
        })
    }

    pub(crate) fn push(&mut self, command: PendingCommand) {
        self.prune_expired();
        self.slots.push_back(Slot::Live(command));
    }

    /// Finds and removes the slot a reply belongs to.
    ///
    /// With an echoed `id` only that slot matches. Otherwise a `getpin`
    /// reply naming `pin` prefers the oldest slot for that pin, and any
    /// other reply takes the oldest slot with `verb`.
    pub(crate) fn take_match(&mut self, id: Option<RequestId>, verb: Verb, pin: Option<&str>) -> Match {
        self.prune_expired();

        let by_pin = match (id, pin) {
            (None, Some(pin)) => self
                .slots
                .iter()
                .position(|slot| slot.verb() == verb && slot.pin() == Some(pin)),
            _ => None,
        };
        let position = match id {
            Some(id) => self.slots.iter().position(|slot| slot.id() == id),
            None => by_pin.or_else(|| self.slots.iter().position(|slot| slot.verb() == verb)),
        };

        let Some(position) = position else {
            return Match::Unmatched;
        };
        let Some(slot) = self.slots.remove(position) else {
            return Match::Unmatched;
        };

        // Replies come back in order, so timed-out commands of this verb
        // queued ahead of a pin match will never be answered.
        if by_pin.is_some() {
            self.discard_expired_before(position, verb);
        }

        match slot {
            Slot::Live(command) => Match::Command(command),
            Slot::Expired { id, .. } => Match::Expired(id),
        }
    }

    /// Marks the command with `id` as timed out.
    ///
    /// Returns `false` if it was not outstanding.
    pub(crate) fn expire(&mut self, id: RequestId) -> bool {
        let Some(slot) = self
            .slots
            .iter_mut()
            .find(|slot| slot.is_live() && slot.id() == id)
        else {
            return false;
        };

        let (verb, pin) = (slot.verb(), slot.pin().map(str::to_string));
        *slot = Slot::Expired {
            id,
            verb,
            pin,
            since: Instant::now(),
        };

        let expired = self.slots.iter().filter(|slot| !slot.is_live()).count();
        if expired > MAX_EXPIRED {
            if let Some(oldest) = self.slots.iter().position(|slot| !slot.is_live()) {
                self.slots.remove(oldest);
            }
        }
        true
    }

    /// Removes every outstanding command, oldest first.
    ///
    /// Timed-out commands are forgotten too; their replies cannot arrive
    /// on a later socket.
    pub(crate) fn drain(&mut self) -> Vec<PendingCommand> {
        self.slots
            .drain(..)
            .filter_map(|slot| match slot {
                Slot::Live(command) => Some(command),
                Slot::Expired { .. } => None,
            })
            .collect()
    }

    fn prune_expired(&mut self) {
        self.slots.retain(|slot| match slot {
            Slot::Live(_) => true,
            Slot::Expired { since, .. } => since.elapsed() < EXPIRED_RETENTION,
        });
    }

    fn discard_expired_before(&mut self, position: usize, verb: Verb) {
        let mut index = 0;
        self.slots.retain(|slot| {
            let keep = index >= position || slot.is_live() || slot.verb() != verb;
            index += 1;
            keep
        });
    }
}

// ============================================================================
// Tests
// ============================================================================
