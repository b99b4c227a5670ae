//! Command submission and reply futures.

// ============================================================================
// Imports
// ============================================================================

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{Command, Reply, Request, Verb};
use crate::transport::Connection;

use super::pending::{PendingCommand, PendingTable, SharedPending};

// ============================================================================
// CommandDispatcher
// ============================================================================

/// Sends commands over a [`Connection`] and tracks them until answered.
#[derive(Clone)]
pub struct CommandDispatcher {
    connection: Connection,
    pending: SharedPending,
}

impl CommandDispatcher {
    /// Creates a dispatcher writing to `connection` and recording into
    /// `pending`.
    #[must_use]
    pub fn new(connection: Connection, pending: SharedPending) -> Self {
        Self {
            connection,
            pending,
        }
    }

    /// Sends `command` and returns a future for its reply.
    ///
    /// Returns as soon as the frame is queued for writing. The returned
    /// [`PendingReply`] resolves exactly once.
    ///
    /// # Errors
    ///
    /// - [`Error::Disconnected`] if the connection is not open; nothing is sent
    /// - [`Error::Protocol`] if too many commands are outstanding
    /// - [`Error::Json`] if the request cannot be serialized
    pub fn send_command(&self, command: Command) -> Result<PendingReply> {
        let request = Request::new(&command);
        let frame = request.to_frame()?;
        let verb = command.verb();
        let max_pending = self.connection.options().max_pending;
        let (reply_tx, reply_rx) = oneshot::channel();

        // The table stays locked until the command is recorded so its reply
        // cannot be routed first, and a disconnect cannot slip in between.
        {
            let mut pending = self.pending.lock();
            if pending.len() >= max_pending {
                warn!(
                    pending = pending.len(),
                    max = max_pending,
                    "Too many pending commands"
                );
                return Err(Error::protocol(format!(
                    "Too many pending commands: {}/{}",
                    pending.len(),
                    max_pending
                )));
            }

            self.connection.send(frame)?;
            pending.push(PendingCommand::new(request.id, command, reply_tx));
        }

        trace!(id = %request.id, %verb, endpoint = %self.connection.endpoint(), "Command sent");

        Ok(PendingReply {
            id: request.id,
            verb,
            reply_rx,
            timeout: self.connection.options().command_timeout,
            pending: Arc::downgrade(&self.pending),
        })
    }

    /// Sends `command` and invokes `callback` with the outcome.
    ///
    /// The callback runs at most once, on a spawned task.
    ///
    /// # Errors
    ///
    /// Same as [`send_command`](Self::send_command); on error the callback
    /// is never invoked.
    pub fn send_command_with<F>(&self, command: Command, callback: F) -> Result<()>
    where
        F: FnOnce(Result<Reply>) + Send + 'static,
    {
        let reply = self.send_command(command)?;
        tokio::spawn(async move {
            callback(reply.await);
        });
        Ok(())
    }

    /// Fails every outstanding command with the error built by `error`.
    ///
    /// Returns the number of commands failed.
    pub fn fail_all(&self, error: impl Fn() -> Error) -> usize {
        fail_pending(&self.pending, error)
    }

    /// Returns the number of outstanding commands.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Drains `pending` and fails each command.
pub(crate) fn fail_pending(pending: &Mutex<PendingTable>, error: impl Fn() -> Error) -> usize {
    let drained = pending.lock().drain();
    let count = drained.len();

    for command in drained {
        command.fail(error());
    }

    if count > 0 {
        debug!(count, "Failed pending commands");
    }
    count
}

// ============================================================================
// PendingReply
// ============================================================================

/// Future for the reply to one command.
///
/// Await it directly or call [`wait`](Self::wait). Dropping it without
/// awaiting leaves the command outstanding until a reply or close consumes
/// it.
#[derive(Debug)]
#[must_use = "the reply is lost unless awaited"]
pub struct PendingReply {
    id: RequestId,
    verb: Verb,
    reply_rx: oneshot::Receiver<Result<Reply>>,
    timeout: Option<Duration>,
    pending: Weak<Mutex<PendingTable>>,
}

impl PendingReply {
    /// Returns the request id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Returns the verb of the command.
    #[inline]
    #[must_use]
    pub fn verb(&self) -> Verb {
        self.verb
    }

    /// Waits for the reply.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownPin`] if the controller rejected the pin
    /// - [`Error::RequestTimeout`] if no reply arrives within the timeout
    /// - [`Error::ConnectionLost`] / [`Error::ConnectionClosed`] if the
    ///   connection went away first
    pub async fn wait(self) -> Result<Reply> {
        let Some(limit) = self.timeout else {
            return self.reply_rx.await.unwrap_or(Err(Error::ConnectionClosed));
        };

        match timeout(limit, self.reply_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                if let Some(pending) = self.pending.upgrade() {
                    if pending.lock().expire(self.id) {
                        debug!(id = %self.id, verb = %self.verb, "Command timed out, awaiting late reply");
                    }
                }
                Err(Error::request_timeout(self.id, limit.as_millis() as u64))
            }
        }
    }
}

impl IntoFuture for PendingReply {
    type Output = Result<Reply>;
    type IntoFuture = Pin<Box<dyn Future<Output = Result<Reply>> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

// ============================================================================
// Tests
// ============================================================================
