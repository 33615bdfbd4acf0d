//! Fake bridge collaborators for integration testing
//!
//! Everything `SmtpBackend` consumes but does not own, in a form the
//! tests can inspect:
//!
//! - `directory` -- builder for `AccountDirectory` fixtures
//! - `sender` -- a `MessageSender` that records deliveries and can be
//!   told to fail
//! - `faults` -- a resolver that panics on demand and a panic handler
//!   that records what it caught

#![allow(dead_code)]

pub mod directory;
pub mod faults;
pub mod sender;

pub use directory::DirectoryBuilder;
pub use faults::{PanickingBridge, RecordingPanicHandler};
pub use sender::RecordingSender;
