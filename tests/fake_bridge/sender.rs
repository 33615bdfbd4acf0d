//! Recording delivery backend.

use proton_smtp_backend::{DeliveryError, MessageSender, OutgoingMessage};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A `MessageSender` that keeps every delivered message.
///
/// `fail_next(n)` makes the next `n` deliveries fail without recording
/// anything, which is how a transient remote error looks to the
/// session. `with_delay` makes every delivery take that long, failing
/// ones included.
#[derive(Default)]
pub struct RecordingSender {
    delivered: Mutex<Vec<OutgoingMessage>>,
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
    delay: Duration,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Deliveries started so far, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<OutgoingMessage> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

impl MessageSender for RecordingSender {
    async fn deliver(&self, message: &OutgoingMessage) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DeliveryError("remote API unavailable".to_string()));
        }

        self.delivered.lock().unwrap().push(message.clone());
        Ok(())
    }
}
