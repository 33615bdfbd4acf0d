//! Outgoing message envelope and fingerprints

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A message the SMTP layer has finished reading and wants to send.
///
/// Body parsing and key lookup happen before this point; the caller
/// decides whether every recipient gets an end-to-end encrypted copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub message_id: String,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub end_to_end_encrypted: bool,
}

impl OutgoingMessage {
    #[must_use]
    pub fn new(
        message_id: impl Into<String>,
        from: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            from: from.into(),
            to: Vec::new(),
            subject: subject.into(),
            body: body.into(),
            end_to_end_encrypted: true,
        }
    }

    /// Adds a recipient.
    #[must_use]
    pub fn to(mut self, recipient: impl Into<String>) -> Self {
        self.to.push(recipient.into());
        self
    }

    /// Marks the message as leaving without end-to-end encryption.
    #[must_use]
    pub const fn plaintext(mut self) -> Self {
        self.end_to_end_encrypted = false;
        self
    }

    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }
}

/// Identity of a message for duplicate-send detection.
///
/// Two messages with the same sender, recipient set, subject and body
/// share a fingerprint, whatever order the recipients were given in
/// and whatever message id the client generated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    #[must_use]
    pub fn of(message: &OutgoingMessage) -> Self {
        let mut recipients: Vec<String> = message.to.iter().map(|r| r.to_lowercase()).collect();
        recipients.sort_unstable();
        recipients.dedup();

        let mut hasher = Sha256::new();
        for part in [
            message.from.to_lowercase().as_str(),
            recipients.join(",").as_str(),
            message.subject.as_str(),
            message.body.as_str(),
        ] {
            // Length-prefix every field so field boundaries can't shift.
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// Wrap an externally derived fingerprint.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> OutgoingMessage {
        OutgoingMessage::new("<1@local>", "alice@proton.me", "Hello", "Body")
            .to("bob@example.com")
            .to("carol@example.com")
    }

    #[test]
    fn defaults_to_encrypted() {
        assert!(sample().end_to_end_encrypted);
        assert!(!sample().plaintext().end_to_end_encrypted);
    }

    #[test]
    fn fingerprint_is_hex_sha256() {
        let fp = sample().fingerprint();
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn message_id_does_not_affect_fingerprint() {
        let mut resubmitted = sample();
        resubmitted.message_id = "<2@local>".to_string();
        assert_eq!(sample().fingerprint(), resubmitted.fingerprint());
    }

    #[test]
    fn content_changes_fingerprint() {
        let mut edited = sample();
        edited.body.push('!');
        assert_ne!(sample().fingerprint(), edited.fingerprint());

        let extra = sample().to("dave@example.com");
        assert_ne!(sample().fingerprint(), extra.fingerprint());
    }

    #[test]
    fn field_boundaries_are_unambiguous() {
        let a = OutgoingMessage::new("id", "a@x", "ab", "c");
        let b = OutgoingMessage::new("id", "a@x", "a", "bc");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    proptest! {
        #[test]
        fn recipient_order_and_case_ignored(
            mut recipients in proptest::collection::vec("[a-z]{1,8}@[a-z]{1,5}\\.com", 1..6),
        ) {
            let forward = recipients
                .iter()
                .fold(OutgoingMessage::new("id", "me@pm.me", "s", "b"), |m, r| m.to(r.clone()));

            recipients.reverse();
            let backward = recipients
                .iter()
                .fold(OutgoingMessage::new("id", "ME@pm.me", "s", "b"), |m, r| m.to(r.to_uppercase()));

            prop_assert_eq!(forward.fingerprint(), backward.fingerprint());
        }
    }
}
