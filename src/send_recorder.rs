//! Duplicate-send ledger
//!
//! Mail clients resubmit a message when they don't see the final SMTP
//! reply in time, and the backend itself may retry after a transient
//! failure. The recorder remembers fingerprints of messages already
//! committed to delivery so a resubmission within the retention window
//! is acknowledged without being sent again.
//!
//! A fingerprint whose delivery is still running is *in flight*, not
//! committed. A resubmission that finds it waits for the outcome: if
//! the first delivery fails, the resubmission takes over the claim and
//! sends the message itself.

use crate::message::Fingerprint;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
enum Entry {
    /// Handed to a sender that hasn't reported back yet. The receiver
    /// is closed once the owning [`SendClaim`] is dropped.
    InFlight {
        token: u64,
        done: watch::Receiver<()>,
    },
    Committed {
        at: Instant,
    },
}

#[derive(Debug, Default)]
struct Ledger {
    entries: HashMap<Fingerprint, Entry>,
    /// Commit times, oldest first. May hold stale items for
    /// fingerprints released or recommitted since.
    expiry: VecDeque<(Instant, Fingerprint)>,
    next_token: u64,
}

impl Ledger {
    fn evict_expired(&mut self, now: Instant, retention: Duration) {
        while self
            .expiry
            .front()
            .is_some_and(|(at, _)| now.duration_since(*at) >= retention)
        {
            let Some((at, fingerprint)) = self.expiry.pop_front() else {
                break;
            };
            if matches!(
                self.entries.get(&fingerprint),
                Some(Entry::Committed { at: committed }) if *committed == at
            ) {
                self.entries.remove(&fingerprint);
            }
        }
    }

    fn commit(&mut self, fingerprint: Fingerprint, at: Instant) {
        self.expiry.push_back((at, fingerprint.clone()));
        self.entries.insert(fingerprint, Entry::Committed { at });
    }
}

/// What [`SendRecorder::claim`] saw for a fingerprint.
enum Attempt<'a> {
    Claimed(SendClaim<'a>),
    Committed,
    InFlight(watch::Receiver<()>),
}

#[derive(Debug)]
pub struct SendRecorder {
    retention: Duration,
    ledger: Mutex<Ledger>,
}

impl SendRecorder {
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Claim `fingerprint` and record it as committed right away.
    ///
    /// Returns `true` if it was already claimed (in flight or committed)
    /// within the retention window, in which case the caller must not
    /// send again. Returns `false` (and records the claim) otherwise.
    pub fn try_claim(&self, fingerprint: &Fingerprint) -> bool {
        let mut ledger = self.lock();
        let now = Instant::now();
        ledger.evict_expired(now, self.retention);

        if ledger.entries.contains_key(fingerprint) {
            debug!("Fingerprint {} already claimed", fingerprint);
            return true;
        }
        ledger.commit(fingerprint.clone(), now);
        false
    }

    /// Claim `fingerprint` for an in-flight delivery.
    ///
    /// Returns `None` if the fingerprint is committed. If another
    /// delivery of it is in flight, waits until that one is committed
    /// (then `None`) or released (then the claim is taken over). The
    /// returned claim is released on drop unless [`SendClaim::commit`]
    /// is called, so a failed or cancelled delivery doesn't block the
    /// client's retry.
    pub async fn claim<'a>(&'a self, fingerprint: &Fingerprint) -> Option<SendClaim<'a>> {
        loop {
            let mut done = match self.attempt(fingerprint) {
                Attempt::Claimed(claim) => return Some(claim),
                Attempt::Committed => return None,
                Attempt::InFlight(done) => done,
            };
            debug!("Fingerprint {} is in flight, waiting for its outcome", fingerprint);
            // Never sent on; fails once the claim's sender is dropped.
            let _ = done.changed().await;
        }
    }

    /// Forget a fingerprint so the message may be sent again.
    pub fn release(&self, fingerprint: &Fingerprint) {
        if self.lock().entries.remove(fingerprint).is_some() {
            debug!("Released fingerprint {}", fingerprint);
        }
    }

    /// Whether a delivery of `fingerprint` is currently running.
    #[must_use]
    pub fn is_in_flight(&self, fingerprint: &Fingerprint) -> bool {
        matches!(
            self.lock().entries.get(fingerprint),
            Some(Entry::InFlight { .. })
        )
    }

    /// Number of claims currently held, including expired ones not
    /// yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    fn attempt(&self, fingerprint: &Fingerprint) -> Attempt<'_> {
        let mut ledger = self.lock();
        ledger.evict_expired(Instant::now(), self.retention);

        if let Some(entry) = ledger.entries.get(fingerprint) {
            return match entry {
                Entry::Committed { .. } => {
                    debug!("Fingerprint {} already committed", fingerprint);
                    Attempt::Committed
                }
                Entry::InFlight { done, .. } => Attempt::InFlight(done.clone()),
            };
        }

        let token = ledger.next_token;
        ledger.next_token += 1;
        let (sender, done) = watch::channel(());
        ledger
            .entries
            .insert(fingerprint.clone(), Entry::InFlight { token, done });

        Attempt::Claimed(SendClaim {
            recorder: self,
            fingerprint: fingerprint.clone(),
            token,
            committed: false,
            _done: sender,
        })
    }

    fn finish(&self, fingerprint: &Fingerprint, token: u64, committed: bool) {
        let mut ledger = self.lock();
        let ours = matches!(
            ledger.entries.get(fingerprint),
            Some(Entry::InFlight { token: held, .. }) if *held == token
        );
        if !ours {
            return;
        }

        if committed {
            let now = Instant::now();
            ledger.commit(fingerprint.clone(), now);
        } else {
            ledger.entries.remove(fingerprint);
            debug!("Released fingerprint {}", fingerprint);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A fingerprint claimed for an in-flight delivery.
#[derive(Debug)]
pub struct SendClaim<'a> {
    recorder: &'a SendRecorder,
    fingerprint: Fingerprint,
    token: u64,
    committed: bool,
    // Dropped after `Drop::drop` has updated the ledger, which wakes
    // resubmissions waiting on this delivery.
    _done: watch::Sender<()>,
}

impl SendClaim<'_> {
    /// Keep the claim: the message was delivered.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for SendClaim<'_> {
    fn drop(&mut self) {
        self.recorder
            .finish(&self.fingerprint, self.token, self.committed);
    }
}
