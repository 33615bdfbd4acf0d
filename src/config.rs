//! Backend configuration

use crate::error::{Error, Result};
use std::env;
use std::time::Duration;

/// Shortest delay imposed after a failed credential check.
pub const MIN_BAD_LOGIN_DELAY: Duration = Duration::from_secs(10);

/// Timing knobs shared by every session of one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// How long a failed login is held before the error is returned.
    pub bad_login_delay: Duration,
    /// How long a send waits for an unencrypted-send decision before
    /// it is treated as denied.
    pub confirmation_timeout: Duration,
    /// How long a sent message's fingerprint blocks a resend.
    pub send_retention: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            bad_login_delay: MIN_BAD_LOGIN_DELAY,
            confirmation_timeout: Duration::from_secs(5 * 60),
            send_retention: Duration::from_secs(30 * 60),
        }
    }
}

impl BackendConfig {
    /// Load backend configuration from environment variables
    ///
    /// Reads from `.env` file if present. All variables are optional
    /// and expressed in whole seconds:
    /// - `SMTP_BAD_LOGIN_DELAY_SECS` (default: `10`, minimum `10`)
    /// - `SMTP_CONFIRM_TIMEOUT_SECS` (default: `300`)
    /// - `SMTP_SEND_RETENTION_SECS` (default: `1800`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is not a number or the
    /// resulting configuration fails [`BackendConfig::validate`].
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            bad_login_delay: secs_var("SMTP_BAD_LOGIN_DELAY_SECS", defaults.bad_login_delay)?,
            confirmation_timeout: secs_var(
                "SMTP_CONFIRM_TIMEOUT_SECS",
                defaults.confirmation_timeout,
            )?,
            send_retention: secs_var("SMTP_SEND_RETENTION_SECS", defaults.send_retention)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration against the backend's hard limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the bad-login delay is below
    /// [`MIN_BAD_LOGIN_DELAY`] or a timeout/retention window is zero.
    pub fn validate(&self) -> Result<()> {
        if self.bad_login_delay < MIN_BAD_LOGIN_DELAY {
            return Err(Error::Config(format!(
                "bad login delay must be at least {}s",
                MIN_BAD_LOGIN_DELAY.as_secs()
            )));
        }
        if self.confirmation_timeout.is_zero() {
            return Err(Error::Config("confirmation timeout must be non-zero".into()));
        }
        if self.send_retention.is_zero() {
            return Err(Error::Config("send retention must be non-zero".into()));
        }
        Ok(())
    }
}

fn secs_var(name: &str, default: Duration) -> Result<Duration> {
    env::var(name).map_or(Ok(default), |raw| {
        raw.trim()
            .parse()
            .map(Duration::from_secs)
            .map_err(|e| Error::Config(format!("Invalid {name}: {e}")))
    })
}
