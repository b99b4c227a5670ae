//! Subscriber bookkeeping and inbound routing.
//!
//! [`SubscriptionRegistry`] is the connection's inbound handler. Every
//! decoded frame is either matched to a pending command or, if nothing is
//! waiting for it, fanned out to the subscribers of its pin.
//!
//! Subscriptions are held through a [`Subscription`] handle; dropping the
//! handle unregisters it, so nothing is delivered to a consumer that is
//! gone. Each subscriber buffers at most [`SUBSCRIBER_BUFFER`] messages;
//! changes arriving while the buffer is full are dropped.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::identifiers::SubscriberId;
use crate::protocol::{Inbound, PinValue, Verb};
use crate::transport::InboundHandler;

use super::dispatcher::fail_pending;
use super::pending::{Match, SharedPending};

// ============================================================================
// Constants
// ============================================================================

/// Topic prefix of single-pin messages.
pub const SINGLE_TOPIC_PREFIX: &str = "revpi/single/";

/// Topic of multi-pin messages.
pub const MULTI_TOPIC: &str = "revpi/multi";

/// Messages buffered per subscriber before new ones are dropped.
pub const SUBSCRIBER_BUFFER: usize = 256;

// ============================================================================
// SubscriptionKind
// ============================================================================

/// How a subscriber wants pin data shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    /// One input pin.
    SingleInput,
    /// Several input pins, delivered as a name → value map.
    MultiInput,
    /// On-demand pin reads.
    Getpin,
    /// One output pin. Tracked, but pin changes are not delivered.
    Output,
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SingleInput => "single-input",
            Self::MultiInput => "multi-input",
            Self::Getpin => "getpin",
            Self::Output => "output",
        };
        f.write_str(name)
    }
}

// ============================================================================
// PinMessage
// ============================================================================

/// A message a consumer forwards into the flow.
#[derive(Debug, Clone, PartialEq)]
pub struct PinMessage {
    /// Pin value, or a name → value object for multi-pin messages.
    pub payload: Value,
    /// `revpi/single/<pin>` or `revpi/multi`.
    pub topic: String,
}

impl PinMessage {
    /// Creates a single-pin message.
    #[must_use]
    pub fn single(pin: &PinValue) -> Self {
        Self {
            payload: Value::String(pin.value.clone()),
            topic: format!("{SINGLE_TOPIC_PREFIX}{}", pin.name),
        }
    }

    /// Creates a multi-pin message.
    #[must_use]
    pub fn multi(values: &BTreeMap<String, String>) -> Self {
        Self {
            payload: json!(values),
            topic: MULTI_TOPIC.to_string(),
        }
    }

    /// Shapes `pin` for a subscriber of `kind`.
    #[must_use]
    pub fn for_kind(kind: SubscriptionKind, pin: &PinValue) -> Self {
        match kind {
            SubscriptionKind::MultiInput => {
                Self::multi(&BTreeMap::from([(pin.name.clone(), pin.value.clone())]))
            }
            _ => Self::single(pin),
        }
    }
}

// ============================================================================
// SubscriptionRegistry
// ============================================================================

struct Subscriber {
    kind: SubscriptionKind,
    pins: Vec<String>,
    tx: mpsc::Sender<PinMessage>,
}

/// Routes inbound frames to pending commands and subscribers.
pub struct SubscriptionRegistry {
    subscribers: Mutex<FxHashMap<SubscriberId, Subscriber>>,
    pending: SharedPending,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscribers", &self.len())
            .finish()
    }
}

impl SubscriptionRegistry {
    /// Creates a registry that resolves replies against `pending`.
    #[must_use]
    pub fn new(pending: SharedPending) -> Self {
        Self {
            subscribers: Mutex::new(FxHashMap::default()),
            pending,
        }
    }

    /// Registers interest in `pins`.
    pub fn register(
        self: &Arc<Self>,
        kind: SubscriptionKind,
        pins: Vec<String>,
    ) -> Subscription {
        let id = SubscriberId::next();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);

        debug!(%id, %kind, ?pins, "Subscriber registered");

        self.subscribers.lock().insert(
            id,
            Subscriber {
                kind,
                pins: pins.clone(),
                tx,
            },
        );

        Subscription {
            id,
            kind,
            pins,
            rx,
            registry: Arc::downgrade(self),
        }
    }

    /// Registers a single-input subscriber.
    pub fn register_input(self: &Arc<Self>, pin: impl Into<String>) -> Subscription {
        self.register(SubscriptionKind::SingleInput, vec![pin.into()])
    }

    /// Registers a multi-input subscriber.
    pub fn register_multi_input<I, S>(self: &Arc<Self>, pins: I) -> Subscription
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pins = pins.into_iter().map(Into::into).collect();
        self.register(SubscriptionKind::MultiInput, pins)
    }

    /// Registers a getpin subscriber.
    pub fn register_getpin(self: &Arc<Self>, pin: impl Into<String>) -> Subscription {
        self.register(SubscriptionKind::Getpin, vec![pin.into()])
    }

    /// Registers an output subscriber.
    pub fn register_output(self: &Arc<Self>, pin: impl Into<String>) -> Subscription {
        self.register(SubscriptionKind::Output, vec![pin.into()])
    }

    /// Removes a subscriber. Returns `false` if it was not registered.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.lock().remove(&id).is_some();
        if removed {
            debug!(%id, "Subscriber unregistered");
        }
        removed
    }

    /// Removes every subscriber; their receivers then end.
    pub fn clear(&self) {
        let count = {
            let mut subscribers = self.subscribers.lock();
            let count = subscribers.len();
            subscribers.clear();
            count
        };
        if count > 0 {
            debug!(count, "Subscribers cleared");
        }
    }

    /// Returns the number of subscribers.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Returns `true` if there are no subscribers.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }

    /// Routes one inbound frame.
    ///
    /// A reply that matches a pending command resolves it. An uncorrelated
    /// `getpin` reply or a push is delivered to the pin's subscribers. A
    /// late reply to a timed-out command, and anything else, is dropped.
    pub fn route(&self, message: Inbound) {
        let (id, verb, payload) = match message {
            Inbound::PushNotification(pin) => {
                self.deliver(&pin);
                return;
            }
            Inbound::CommandReply { id, verb, payload } => (id, verb, payload),
            Inbound::ListResult { id, payload } => (id, Verb::List, payload),
        };

        let reported = (verb == Verb::GetPin).then(|| PinValue::from_payload(&payload));
        let named = match &reported {
            Some(Ok(pin)) => Some(pin.name.as_str()),
            _ => None,
        };

        let matched = self.pending.lock().take_match(id, verb, named);
        match matched {
            Match::Command(command) => {
                trace!(id = %command.id(), %verb, "Reply matched");
                command.resolve(payload);
            }
            Match::Expired(id) => {
                debug!(%id, %verb, "Late reply to timed-out command dropped");
            }
            Match::Unmatched => match reported {
                Some(Ok(pin)) => {
                    self.deliver(&pin);
                }
                Some(Err(e)) => warn!(error = %e, "Unsolicited getpin reply without pin data"),
                None => debug!(%verb, "Reply with no pending command dropped"),
            },
        }
    }

    /// Delivers `pin` to every matching subscriber. Returns the count.
    fn deliver(&self, pin: &PinValue) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let subscribers = self.subscribers.lock();
            for (id, subscriber) in subscribers.iter() {
                if subscriber.kind == SubscriptionKind::Output
                    || !subscriber.pins.iter().any(|p| *p == pin.name)
                {
                    continue;
                }
                let message = PinMessage::for_kind(subscriber.kind, pin);
                match subscriber.tx.try_send(message) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        trace!(%id, pin = %pin.name, "Subscriber buffer full, change dropped");
                    }
                    Err(TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        for id in closed {
            self.unregister(id);
        }

        trace!(pin = %pin.name, delivered, "Push delivered");
        delivered
    }
}

impl InboundHandler for SubscriptionRegistry {
    fn on_message(&self, message: Inbound) {
        self.route(message);
    }

    fn on_disconnect(&self) {
        fail_pending(&self.pending, || Error::ConnectionLost);
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Handle to one registered subscriber.
///
/// Receives the [`PinMessage`]s routed to it. Dropping the handle
/// unregisters the subscriber.
pub struct Subscription {
    id: SubscriberId,
    kind: SubscriptionKind,
    pins: Vec<String>,
    rx: mpsc::Receiver<PinMessage>,
    registry: Weak<SubscriptionRegistry>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("pins", &self.pins)
            .finish()
    }
}

impl Subscription {
    /// Returns the subscriber id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Returns the subscription kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> SubscriptionKind {
        self.kind
    }

    /// Returns the pins of interest.
    #[inline]
    #[must_use]
    pub fn pins(&self) -> &[String] {
        &self.pins
    }

    /// Waits for the next message.
    ///
    /// Returns `None` once the registry has been cleared or dropped.
    pub async fn recv(&mut self) -> Option<PinMessage> {
        self.rx.recv().await
    }

    /// Returns the next message if one is ready.
    pub fn try_recv(&mut self) -> Option<PinMessage> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.id);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
