//! Proton Bridge SMTP session backend
//!
//! The authentication and send-gating core of a local SMTP server
//! that fronts Proton Mail via
//! [Proton Bridge](https://proton.me/mail/bridge):
//!
//! - [`SmtpBackend::login`] authenticates each connection against a
//!   [`Bridger`] and binds the session to an address in split mode.
//! - [`SmtpSession::send`] asks the user (through an [`Event`]) before
//!   a message leaves without end-to-end encryption, and waits for
//!   [`SmtpBackend::confirm_no_encryption`].
//! - A [`SendRecorder`] keeps client resubmissions from being sent
//!   twice.

mod backend;
mod bridge;
mod config;
mod confirm;
mod error;
mod events;
mod message;
mod panic;
mod preferences;
mod send_recorder;
mod session;

pub use backend::SmtpBackend;
pub use bridge::{
    AccountDirectory, AccountError, AccountRecord, AddressMode, AddressRecord, BridgeUser, Bridger,
};
pub use config::{BackendConfig, MIN_BAD_LOGIN_DELAY};
pub use confirm::{ConfirmationTable, PendingConfirmation};
pub use error::{Error, Result};
pub use events::{Event, EventBus, Listener};
pub use message::{Fingerprint, OutgoingMessage};
pub use panic::{LogPanicHandler, PanicHandler};
pub use preferences::{MemoryPreferences, Preferences, REPORT_OUTGOING_NO_ENC_KEY};
pub use send_recorder::{SendClaim, SendRecorder};
pub use session::{DeliveryError, MessageSender, SendOutcome, SmtpSession};
