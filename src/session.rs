//! Authenticated SMTP session

use crate::backend::SmtpBackend;
use crate::bridge::BridgeUser;
use crate::error::{Error, Result};
use crate::events::{Event, Listener};
use crate::message::OutgoingMessage;
use crate::panic::{PanicHandler, guard};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Failure reported by the remote delivery API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct DeliveryError(pub String);

/// Hands a message to the remote mail service.
pub trait MessageSender: Send + Sync {
    /// Deliver `message`.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryError`] if the remote service rejected or
    /// never acknowledged the message.
    fn deliver(
        &self,
        message: &OutgoingMessage,
    ) -> impl Future<Output = std::result::Result<(), DeliveryError>> + Send;
}

/// Result of a successful [`SmtpSession::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendOutcome {
    /// Handed to the remote service.
    Sent,
    /// An identical message was sent recently; nothing was sent.
    AlreadySent,
}

/// State bound to one accepted connection after a successful login.
pub struct SmtpSession {
    panic_handler: Arc<dyn PanicHandler>,
    events: Arc<dyn Listener>,
    backend: Arc<SmtpBackend>,
    user: Arc<dyn BridgeUser>,
    username: String,
    address_id: String,
}

impl SmtpSession {
    pub(crate) fn new(
        panic_handler: Arc<dyn PanicHandler>,
        events: Arc<dyn Listener>,
        backend: Arc<SmtpBackend>,
        user: Arc<dyn BridgeUser>,
        username: String,
        address_id: String,
    ) -> Self {
        Self {
            panic_handler,
            events,
            backend,
            user,
            username,
            address_id,
        }
    }

    /// The lower-cased name the client logged in with.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Address the session may send as; empty in combined mode.
    #[must_use]
    pub fn address_id(&self) -> &str {
        &self.address_id
    }

    #[must_use]
    pub fn is_split_address(&self) -> bool {
        !self.address_id.is_empty()
    }

    #[must_use]
    pub fn account(&self) -> &Arc<dyn BridgeUser> {
        &self.user
    }

    /// Send `message` through `sender`.
    ///
    /// If the message would leave without end-to-end encryption and the
    /// user asked to be told about that, an
    /// [`Event::OutgoingNoEncryption`] is emitted and the call waits
    /// for [`SmtpBackend::confirm_no_encryption`]. A message identical
    /// to one sent within the retention window is acknowledged with
    /// [`SendOutcome::AlreadySent`] and not sent again. A resubmission
    /// arriving while the original is still being delivered waits for
    /// that delivery; if it fails, the resubmission is sent instead.
    ///
    /// # Errors
    ///
    /// - [`Error::SenderNotAllowed`] if the account does not own the
    ///   `From` address, or a split-mode session sends as another one
    ///   of its addresses.
    /// - [`Error::SendCancelled`] if the user denied the send or did not
    ///   answer in time.
    /// - [`Error::ConfirmationPending`] if the same message id is already
    ///   waiting for a decision.
    /// - [`Error::Delivery`] if the remote service failed; the message
    ///   may then be retried.
    /// - [`Error::RuntimeFault`] if the send panicked.
    pub async fn send<S: MessageSender>(
        &self,
        message: &OutgoingMessage,
        sender: &S,
    ) -> Result<SendOutcome> {
        guard(
            self.panic_handler.as_ref(),
            "smtp send",
            self.send_unguarded(message, sender),
        )
        .await
    }

    async fn send_unguarded<S: MessageSender>(
        &self,
        message: &OutgoingMessage,
        sender: &S,
    ) -> Result<SendOutcome> {
        self.check_sender(&message.from)?;

        if !message.end_to_end_encrypted && self.backend.should_report_outgoing_no_enc() {
            self.confirm_plaintext(message).await?;
        }

        let fingerprint = message.fingerprint();
        let Some(claim) = self.backend.send_recorder().claim(&fingerprint).await else {
            warn!(
                "Message {} from {} was already sent, not sending again",
                message.message_id, self.username
            );
            return Ok(SendOutcome::AlreadySent);
        };

        if let Err(e) = sender.deliver(message).await {
            error!("Could not send message {}: {}", message.message_id, e);
            return Err(Error::Delivery(e.to_string()));
        }
        claim.commit();

        info!("Message {} sent by {}", message.message_id, self.username);
        Ok(SendOutcome::Sent)
    }

    /// The account must own `from`; a split-mode session may only send
    /// as the address it logged in with.
    fn check_sender(&self, from: &str) -> Result<()> {
        let address_id = self.user.get_address_id(from).map_err(|e| {
            warn!("User {} cannot send as {}: {}", self.username, from, e);
            Error::SenderNotAllowed(format!("{from} is not an address of this account"))
        })?;

        if self.is_split_address() && address_id != self.address_id {
            warn!(
                "Session of {} is bound to address {}, refusing to send as {}",
                self.username, self.address_id, from
            );
            return Err(Error::SenderNotAllowed(format!(
                "{from} is not the address this session logged in with"
            )));
        }
        Ok(())
    }

    async fn confirm_plaintext(&self, message: &OutgoingMessage) -> Result<()> {
        let pending = self
            .backend
            .confirmations()
            .register(message.message_id.clone())?;

        self.events.emit(Event::OutgoingNoEncryption {
            message_id: message.message_id.clone(),
            subject: message.subject.clone(),
        });

        if pending
            .wait(self.backend.config().confirmation_timeout)
            .await
        {
            Ok(())
        } else {
            info!("Unencrypted message {} was not confirmed", message.message_id);
            Err(Error::SendCancelled(message.message_id.clone()))
        }
    }
}

impl fmt::Debug for SmtpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSession")
            .field("username", &self.username)
            .field("address_id", &self.address_id)
            .field("account", &self.user)
            .finish_non_exhaustive()
    }
}
