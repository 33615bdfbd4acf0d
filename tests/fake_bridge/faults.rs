//! Fault injection for the panic boundary.

use proton_smtp_backend::{AccountDirectory, AccountError, BridgeUser, Bridger, PanicHandler};
use std::sync::{Arc, Mutex};

/// Delegates to a real directory, but panics when asked for `trigger`.
pub struct PanickingBridge {
    inner: AccountDirectory,
    trigger: String,
}

impl PanickingBridge {
    pub fn new(inner: AccountDirectory, trigger: &str) -> Self {
        Self {
            inner,
            trigger: trigger.to_string(),
        }
    }
}

impl Bridger for PanickingBridge {
    fn get_user(&self, query: &str) -> Result<Arc<dyn BridgeUser>, AccountError> {
        assert!(query != self.trigger, "account store corrupted for {query}");
        self.inner.get_user(query)
    }
}

/// Records every panic it is handed.
#[derive(Default)]
pub struct RecordingPanicHandler {
    caught: Mutex<Vec<String>>,
}

impl RecordingPanicHandler {
    pub fn caught(&self) -> Vec<String> {
        self.caught.lock().unwrap().clone()
    }
}

impl PanicHandler for RecordingPanicHandler {
    fn handle_panic(&self, context: &str, message: &str) {
        self.caught
            .lock()
            .unwrap()
            .push(format!("{context}: {message}"));
    }
}
