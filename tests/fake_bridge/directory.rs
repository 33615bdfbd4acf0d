//! Account fixtures
//!
//! ```ignore
//! let directory = DirectoryBuilder::new()
//!     .account("alice", "alice-pass", AddressMode::Combined)
//!         .address("a-1", "alice@proton.me")
//!     .account("bob", "bob-pass", AddressMode::Split)
//!         .address("b-1", "bob@proton.me")
//!         .address("b-2", "bob@pm.me")
//!     .build();
//! ```

use proton_smtp_backend::{AccountDirectory, AccountRecord, AddressMode, AddressRecord};

/// Builder for an `AccountDirectory`.
///
/// Call `.account(..)` to start a new account, then chain
/// `.address(id, email)` calls to add addresses to it.
pub struct DirectoryBuilder {
    accounts: Vec<AccountRecord>,
}

impl DirectoryBuilder {
    pub fn new() -> Self {
        Self {
            accounts: Vec::new(),
        }
    }

    /// Add a new account. Subsequent `.address()` calls add to it.
    pub fn account(mut self, username: &str, bridge_password: &str, mode: AddressMode) -> Self {
        self.accounts.push(AccountRecord {
            username: username.to_string(),
            bridge_password: bridge_password.to_string(),
            address_mode: mode,
            addresses: Vec::new(),
        });
        self
    }

    /// Add an address to the most recently added account.
    ///
    /// # Panics
    ///
    /// Panics if called before any `.account()` call.
    pub fn address(mut self, id: &str, email: &str) -> Self {
        self.accounts
            .last_mut()
            .expect("call .account() before .address()")
            .addresses
            .push(AddressRecord {
                id: id.to_string(),
                email: email.to_string(),
            });
        self
    }

    pub fn build(self) -> AccountDirectory {
        AccountDirectory::new(self.accounts)
    }

    /// The JSON document `AccountDirectory::from_file` expects.
    pub fn to_json(&self) -> String {
        serde_json::json!({ "accounts": self.accounts }).to_string()
    }
}
