//! Confirmation handshake for unencrypted outgoing mail
//!
//! A send that needs a human decision registers its message id here
//! and waits on the returned [`PendingConfirmation`]. The decision
//! arrives from an unrelated task through
//! [`ConfirmationTable::resolve`]. Each entry is a one-shot slot: it
//! is written at most once, read at most once, and removed from the
//! table whichever side finishes first.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

type Entries = Arc<Mutex<HashMap<String, Slot>>>;

#[derive(Debug)]
struct Slot {
    token: u64,
    sender: oneshot::Sender<bool>,
}

/// Message id -> waiting sender, shared by all sessions of a backend.
#[derive(Debug, Default)]
pub struct ConfirmationTable {
    entries: Entries,
    next_token: AtomicU64,
}

impl ConfirmationTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending decision for `message_id`.
    ///
    /// The entry lives until the decision is delivered or the returned
    /// handle is dropped, whichever comes first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfirmationPending`] if `message_id` already
    /// has a pending entry.
    pub fn register(&self, message_id: impl Into<String>) -> Result<PendingConfirmation> {
        let message_id = message_id.into();
        let (sender, receiver) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        {
            let mut entries = lock(&self.entries);
            if entries.contains_key(&message_id) {
                return Err(Error::ConfirmationPending(message_id));
            }
            entries.insert(message_id.clone(), Slot { token, sender });
        }

        debug!("Registered pending confirmation for {}", message_id);
        Ok(PendingConfirmation {
            message_id,
            token,
            receiver,
            entries: Arc::clone(&self.entries),
        })
    }

    /// Deliver `decision` to the waiter registered for `message_id`.
    ///
    /// Unknown, already resolved, or abandoned ids are ignored. Never
    /// blocks. Returns whether a waiter received the decision.
    pub fn resolve(&self, message_id: &str, decision: bool) -> bool {
        let Some(slot) = lock(&self.entries).remove(message_id) else {
            debug!("No pending confirmation for {}", message_id);
            return false;
        };

        // The waiter may have given up between our removal and this send.
        let delivered = slot.sender.send(decision).is_ok();
        debug!(
            "Resolved confirmation for {} (send: {}, delivered: {})",
            message_id, decision, delivered
        );
        delivered
    }

    #[must_use]
    pub fn is_pending(&self, message_id: &str) -> bool {
        lock(&self.entries).contains_key(message_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }
}

/// Wait handle for one registered decision.
///
/// Dropping the handle (connection closed, send future cancelled)
/// removes its table entry.
#[derive(Debug)]
pub struct PendingConfirmation {
    message_id: String,
    token: u64,
    receiver: oneshot::Receiver<bool>,
    entries: Entries,
}

impl PendingConfirmation {
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Block until a decision arrives or `timeout` elapses.
    ///
    /// Returns the delivered decision, or `false` on timeout.
    pub async fn wait(mut self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, &mut self.receiver).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(_)) => {
                warn!("Confirmation for {} was dropped without a decision", self.message_id);
                false
            }
            Err(_) => {
                warn!(
                    "Confirmation for {} timed out after {:?}, not sending",
                    self.message_id, timeout
                );
                false
            }
        }
    }
}

impl Drop for PendingConfirmation {
    fn drop(&mut self) {
        let mut entries = lock(&self.entries);
        // Only remove our own registration, never a newer one for the same id.
        if entries
            .get(&self.message_id)
            .is_some_and(|slot| slot.token == self.token)
        {
            entries.remove(&self.message_id);
            debug!("Removed abandoned confirmation for {}", self.message_id);
        }
    }
}

fn lock(entries: &Mutex<HashMap<String, Slot>>) -> MutexGuard<'_, HashMap<String, Slot>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}
