//! SMTP session factory
//!
//! One [`SmtpBackend`] exists per running SMTP server. The protocol
//! layer calls [`SmtpBackend::login`] once per accepted connection,
//! each on its own task, and drives the returned [`SmtpSession`].

use crate::bridge::Bridger;
use crate::config::{BackendConfig, MIN_BAD_LOGIN_DELAY};
use crate::confirm::ConfirmationTable;
use crate::error::{Error, Result};
use crate::events::Listener;
use crate::panic::{PanicHandler, guard};
use crate::preferences::{Preferences, REPORT_OUTGOING_NO_ENC_KEY};
use crate::send_recorder::SendRecorder;
use crate::session::SmtpSession;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shared state behind every session of one SMTP server.
pub struct SmtpBackend {
    panic_handler: Arc<dyn PanicHandler>,
    event_listener: Arc<dyn Listener>,
    preferences: Arc<dyn Preferences>,
    bridge: Arc<dyn Bridger>,
    config: BackendConfig,
    confirmations: ConfirmationTable,
    send_recorder: SendRecorder,
}

impl SmtpBackend {
    #[must_use]
    pub fn new(
        panic_handler: Arc<dyn PanicHandler>,
        event_listener: Arc<dyn Listener>,
        preferences: Arc<dyn Preferences>,
        bridge: Arc<dyn Bridger>,
        config: BackendConfig,
    ) -> Arc<Self> {
        let send_recorder = SendRecorder::new(config.send_retention);
        Arc::new(Self {
            panic_handler,
            event_listener,
            preferences,
            bridge,
            config,
            confirmations: ConfirmationTable::new(),
            send_recorder,
        })
    }

    /// Authenticate a connection.
    ///
    /// The username is case-folded before lookup. A wrong password is
    /// answered only after the configured bad-login delay (never less
    /// than ten seconds). In combined address mode the session is not
    /// bound to a specific address.
    ///
    /// # Errors
    ///
    /// - [`Error::AccountNotFound`] if no logged-in user matches.
    /// - [`Error::InvalidCredentials`] if the bridge password is wrong.
    /// - [`Error::AddressResolution`] if the username maps to no address.
    /// - [`Error::RuntimeFault`] if authentication panicked.
    pub async fn login(self: &Arc<Self>, username: &str, password: &str) -> Result<SmtpSession> {
        guard(
            self.panic_handler.as_ref(),
            "smtp login",
            self.authenticate(username, password),
        )
        .await
    }

    async fn authenticate(self: &Arc<Self>, username: &str, password: &str) -> Result<SmtpSession> {
        let username = username.to_lowercase();

        let user = self.bridge.get_user(&username).map_err(|e| {
            warn!("Cannot get user {}: {}", username, e);
            Error::AccountNotFound(e.to_string())
        })?;

        if let Err(e) = user.check_bridge_login(password) {
            error!("Could not check bridge password for {}: {}", username, e);
            // Some clients retry bad credentials in a tight loop.
            tokio::time::sleep(self.config.bad_login_delay.max(MIN_BAD_LOGIN_DELAY)).await;
            return Err(Error::InvalidCredentials(e.to_string()));
        }

        let address_id = user.get_address_id(&username).map_err(|e| {
            error!("Cannot get address id for {}: {}", username, e);
            Error::AddressResolution(e.to_string())
        })?;

        // Address ids only scope split-mode sessions.
        let address_id = if user.is_combined_address_mode() {
            String::new()
        } else {
            address_id
        };

        info!("User {} logged in to SMTP", username);
        Ok(SmtpSession::new(
            Arc::clone(&self.panic_handler),
            Arc::clone(&self.event_listener),
            Arc::clone(self),
            user,
            username,
            address_id,
        ))
    }

    /// Whether unencrypted outgoing mail needs the user's confirmation.
    #[must_use]
    pub fn should_report_outgoing_no_enc(&self) -> bool {
        self.preferences.get_bool(REPORT_OUTGOING_NO_ENC_KEY)
    }

    /// Deliver the user's decision for a message waiting in
    /// [`SmtpSession::send`]. Unknown message ids are ignored.
    pub fn confirm_no_encryption(&self, message_id: &str, should_send: bool) {
        if !self.confirmations.resolve(message_id, should_send) {
            warn!("No send is waiting for a decision on {}", message_id);
        }
    }

    #[must_use]
    pub const fn config(&self) -> &BackendConfig {
        &self.config
    }

    #[must_use]
    pub const fn confirmations(&self) -> &ConfirmationTable {
        &self.confirmations
    }

    #[must_use]
    pub const fn send_recorder(&self) -> &SendRecorder {
        &self.send_recorder
    }
}

impl fmt::Debug for SmtpBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpBackend")
            .field("config", &self.config)
            .field("confirmations", &self.confirmations)
            .field("send_recorder", &self.send_recorder)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{AccountDirectory, AccountRecord, AddressMode, AddressRecord, BridgeUser};
    use crate::events::EventBus;
    use crate::panic::LogPanicHandler;
    use crate::preferences::MemoryPreferences;
    use proptest::prelude::*;

    fn account(mode: AddressMode) -> AccountRecord {
        AccountRecord {
            username: "user".to_string(),
            bridge_password: "bridge-pass".to_string(),
            address_mode: mode,
            addresses: vec![
                AddressRecord {
                    id: "addr-main".to_string(),
                    email: "user@proton.me".to_string(),
                },
                AddressRecord {
                    id: "addr-alias".to_string(),
                    email: "alias@pm.me".to_string(),
                },
            ],
        }
    }

    fn backend(mode: AddressMode) -> Arc<SmtpBackend> {
        SmtpBackend::new(
            Arc::new(LogPanicHandler),
            Arc::new(EventBus::new()),
            Arc::new(MemoryPreferences::new()),
            Arc::new(AccountDirectory::new([account(mode)])),
            BackendConfig::default(),
        )
    }

    #[tokio::test]
    async fn combined_mode_clears_address() {
        let session = backend(AddressMode::Combined)
            .login("alias@pm.me", "bridge-pass")
            .await
            .unwrap();
        assert_eq!(session.username(), "alias@pm.me");
        assert_eq!(session.address_id(), "");
        assert!(!session.is_split_address());
    }

    #[tokio::test]
    async fn split_mode_keeps_address() {
        let session = backend(AddressMode::Split)
            .login("alias@pm.me", "bridge-pass")
            .await
            .unwrap();
        assert_eq!(session.address_id(), "addr-alias");
        assert!(session.is_split_address());
        assert_eq!(session.account().username(), "user");
    }

    #[tokio::test]
    async fn unknown_account_fails_immediately() {
        let started = tokio::time::Instant::now();
        let err = backend(AddressMode::Combined)
            .login("nobody@pm.me", "bridge-pass")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AccountNotFound(_)));
        assert!(started.elapsed() < MIN_BAD_LOGIN_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn bad_password_is_throttled() {
        let started = tokio::time::Instant::now();
        let err = backend(AddressMode::Combined)
            .login("user@proton.me", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials(_)));
        assert!(started.elapsed() >= MIN_BAD_LOGIN_DELAY);
    }

    #[test]
    fn preference_controls_reporting() {
        let prefs = Arc::new(MemoryPreferences::new());
        let backend = SmtpBackend::new(
            Arc::new(LogPanicHandler),
            Arc::new(EventBus::new()),
            Arc::clone(&prefs) as Arc<dyn Preferences>,
            Arc::new(AccountDirectory::default()),
            BackendConfig::default(),
        );
        assert!(!backend.should_report_outgoing_no_enc());

        prefs.set_bool(REPORT_OUTGOING_NO_ENC_KEY, true);
        assert!(backend.should_report_outgoing_no_enc());
    }

    #[test]
    fn confirm_unknown_message_is_noop() {
        let backend = backend(AddressMode::Combined);
        backend.confirm_no_encryption("never-registered", true);
        assert!(backend.confirmations().is_empty());
    }

    proptest! {
        #[test]
        fn login_is_case_insensitive(mask in proptest::collection::vec(any::<bool>(), 14)) {
            let mixed: String = "user@proton.me"
                .chars()
                .zip(mask)
                .map(|(c, upper)| if upper { c.to_ascii_uppercase() } else { c })
                .collect();

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let session = runtime
                .block_on(backend(AddressMode::Split).login(&mixed, "bridge-pass"))
                .unwrap();

            prop_assert_eq!(session.username(), "user@proton.me");
            prop_assert_eq!(session.address_id(), "addr-main");
        }
    }
}
