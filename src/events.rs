//! Event notifications for the control/UI layer
//!
//! The backend only emits events; whoever renders the prompt
//! subscribes to an [`EventBus`] (or implements [`Listener`]) and
//! answers through [`crate::SmtpBackend::confirm_no_encryption`].

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// Default number of events a lagging subscriber may fall behind.
const DEFAULT_CAPACITY: usize = 64;

/// Something the control layer should know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    /// A message is about to leave without end-to-end encryption and
    /// is waiting for an allow/deny decision.
    OutgoingNoEncryption { message_id: String, subject: String },
}

/// Sink for [`Event`]s.
pub trait Listener: Send + Sync {
    fn emit(&self, event: Event);
}

/// Broadcast [`Listener`]: every subscriber sees every event.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Listener for EventBus {
    fn emit(&self, event: Event) {
        // No subscribers is not an error; the event is simply dropped.
        if self.sender.send(event).is_err() {
            debug!("Event emitted with no subscribers");
        }
    }
}
