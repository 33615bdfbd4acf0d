//! Error types for proton-smtp-backend

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown account: {0}")]
    AccountNotFound(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Address resolution failed: {0}")]
    AddressResolution(String),

    #[error("Sender not allowed: {0}")]
    SenderNotAllowed(String),

    #[error("Runtime fault: {0}")]
    RuntimeFault(String),

    #[error("Confirmation already pending for message {0}")]
    ConfirmationPending(String),

    #[error("Sending was cancelled for message {0}")]
    SendCancelled(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
