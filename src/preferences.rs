//! Preference store access

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Whether unencrypted outgoing mail must be confirmed by the user.
pub const REPORT_OUTGOING_NO_ENC_KEY: &str = "report_outgoing_email_without_encryption";

/// Boolean key-value preference store.
pub trait Preferences: Send + Sync {
    /// Read `key`, treating a missing key as `false`.
    fn get_bool(&self, key: &str) -> bool;
}

/// In-memory [`Preferences`].
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: RwLock<HashMap<String, bool>>,
}

impl MemoryPreferences {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_bool(&self, key: impl Into<String>, value: bool) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value);
    }

    /// Builder-style variant of [`MemoryPreferences::set_bool`].
    #[must_use]
    pub fn with_bool(self, key: impl Into<String>, value: bool) -> Self {
        self.set_bool(key, value);
        self
    }
}

impl Preferences for MemoryPreferences {
    fn get_bool(&self, key: &str) -> bool {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(false)
    }
}
