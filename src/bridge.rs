//! Account resolution
//!
//! The SMTP backend never talks to the remote account API directly.
//! It goes through [`Bridger`], which hands out [`BridgeUser`]
//! handles for credential checks and address lookups.
//! [`AccountDirectory`] is a static, JSON-loadable implementation
//! used by the CLI and tests.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by the account service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct AccountError(pub String);

/// Looks up logged-in bridge users by username or address.
pub trait Bridger: Send + Sync {
    /// Return the user owning `query` (a username or one of its
    /// addresses).
    ///
    /// # Errors
    ///
    /// Returns an [`AccountError`] if no such user is known.
    fn get_user(&self, query: &str) -> std::result::Result<Arc<dyn BridgeUser>, AccountError>;
}

/// A user handle returned by a [`Bridger`].
pub trait BridgeUser: Send + Sync + fmt::Debug {
    /// Primary username of the account.
    fn username(&self) -> &str;

    /// Verify `password` against the bridge-specific password.
    ///
    /// # Errors
    ///
    /// Returns an [`AccountError`] if the password does not match.
    fn check_bridge_login(&self, password: &str) -> std::result::Result<(), AccountError>;

    /// Resolve the address id `address` maps to.
    ///
    /// # Errors
    ///
    /// Returns an [`AccountError`] if the address is not one of the
    /// account's addresses.
    fn get_address_id(&self, address: &str) -> std::result::Result<String, AccountError>;

    /// Whether all addresses share one combined identity.
    fn is_combined_address_mode(&self) -> bool;
}

/// How an account exposes its addresses to mail clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressMode {
    /// One identity for every address.
    #[default]
    Combined,
    /// One identity per address.
    Split,
}

/// A single address of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    pub id: String,
    pub email: String,
}

/// One account entry of an [`AccountDirectory`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub username: String,
    pub bridge_password: String,
    #[serde(default)]
    pub address_mode: AddressMode,
    #[serde(default)]
    pub addresses: Vec<AddressRecord>,
}

impl BridgeUser for AccountRecord {
    fn username(&self) -> &str {
        &self.username
    }

    fn check_bridge_login(&self, password: &str) -> std::result::Result<(), AccountError> {
        if constant_time_eq(self.bridge_password.as_bytes(), password.as_bytes()) {
            Ok(())
        } else {
            Err(AccountError("backend/credentials: incorrect password".into()))
        }
    }

    fn get_address_id(&self, address: &str) -> std::result::Result<String, AccountError> {
        if let Some(found) = self
            .addresses
            .iter()
            .find(|a| a.email.eq_ignore_ascii_case(address))
        {
            return Ok(found.id.clone());
        }

        // Logging in with the bare username binds the primary address.
        if self.username.eq_ignore_ascii_case(address)
            && let Some(primary) = self.addresses.first()
        {
            return Ok(primary.id.clone());
        }

        Err(AccountError(format!("address {address} does not belong to {}", self.username)))
    }

    fn is_combined_address_mode(&self) -> bool {
        self.address_mode == AddressMode::Combined
    }
}

/// In-memory [`Bridger`] over a fixed set of accounts.
///
/// # Examples
///
/// ```
/// use proton_smtp_backend::{AccountDirectory, BridgeUser, Bridger};
///
/// let directory = AccountDirectory::from_json_str(r#"{
///     "accounts": [{
///         "username": "alice",
///         "bridge_password": "secret",
///         "addresses": [{ "id": "a1", "email": "alice@proton.me" }]
///     }]
/// }"#).unwrap();
///
/// let user = directory.get_user("ALICE@proton.me").unwrap();
/// assert_eq!(user.username(), "alice");
/// assert!(user.is_combined_address_mode());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountDirectory {
    accounts: Vec<Arc<AccountRecord>>,
}

impl AccountDirectory {
    #[must_use]
    pub fn new(accounts: impl IntoIterator<Item = AccountRecord>) -> Self {
        Self {
            accounts: accounts.into_iter().map(Arc::new).collect(),
        }
    }

    /// Parse a directory from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if the document is malformed.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a directory from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if the file cannot be read, or
    /// [`crate::Error::Json`] if it is malformed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.accounts.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

impl Bridger for AccountDirectory {
    fn get_user(&self, query: &str) -> std::result::Result<Arc<dyn BridgeUser>, AccountError> {
        self.accounts
            .iter()
            .find(|account| {
                account.username.eq_ignore_ascii_case(query)
                    || account
                        .addresses
                        .iter()
                        .any(|a| a.email.eq_ignore_ascii_case(query))
            })
            .map(|account| Arc::clone(account) as Arc<dyn BridgeUser>)
            .ok_or_else(|| AccountError(format!("no logged-in user matches {query}")))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
