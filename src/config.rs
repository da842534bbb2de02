//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Allowed range for the email uniqueness debounce window, in milliseconds.
pub const EMAIL_DEBOUNCE_RANGE_MS: std::ops::RangeInclusive<u64> = 500..=800;

/// Onboarding flow configuration.
#[derive(Debug, Clone)]
pub struct OnboardingConfig {
    /// Base URL of the registration backend (no trailing slash).
    pub api_base_url: String,
    /// Length of the OTP resend countdown.
    pub otp_window: Duration,
    /// Countdown tick period.
    pub countdown_tick: Duration,
    /// Quiet period on the email field before a uniqueness probe is sent.
    pub email_debounce: Duration,
    /// Minimum password length accepted at the credentials step.
    pub min_password_len: usize,
    /// Transport-level timeout for the HTTP client.
    pub request_timeout: Duration,
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api".to_string(),
            otp_window: Duration::from_secs(120),
            countdown_tick: Duration::from_secs(1),
            email_debounce: Duration::from_millis(600),
            min_password_len: 8,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl OnboardingConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let api_base_url = std::env::var("ONBOARD_API_URL")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or(defaults.api_base_url);

        let otp_window = match std::env::var("ONBOARD_OTP_WINDOW_SECS") {
            Ok(raw) => Duration::from_secs(parse_u64("ONBOARD_OTP_WINDOW_SECS", &raw)?),
            Err(_) => defaults.otp_window,
        };

        let email_debounce = match std::env::var("ONBOARD_EMAIL_DEBOUNCE_MS") {
            Ok(raw) => Duration::from_millis(parse_u64("ONBOARD_EMAIL_DEBOUNCE_MS", &raw)?),
            Err(_) => defaults.email_debounce,
        };

        let request_timeout = match std::env::var("ONBOARD_HTTP_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(parse_u64("ONBOARD_HTTP_TIMEOUT_SECS", &raw)?),
            Err(_) => defaults.request_timeout,
        };

        let config = Self {
            api_base_url,
            otp_window,
            email_debounce,
            request_timeout,
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let debounce_ms = self.email_debounce.as_millis() as u64;
        if !EMAIL_DEBOUNCE_RANGE_MS.contains(&debounce_ms) {
            return Err(ConfigError::InvalidValue {
                key: "email_debounce".into(),
                message: format!(
                    "{debounce_ms}ms is outside {}..={}ms",
                    EMAIL_DEBOUNCE_RANGE_MS.start(),
                    EMAIL_DEBOUNCE_RANGE_MS.end()
                ),
            });
        }
        if self.otp_window.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "otp_window".into(),
                message: "must be greater than zero".into(),
            });
        }
        if self.countdown_tick.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "countdown_tick".into(),
                message: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// OTP window expressed in whole countdown seconds.
    pub fn otp_window_secs(&self) -> u32 {
        u32::try_from(self.otp_window.as_secs()).unwrap_or(u32::MAX)
    }
}

fn parse_u64(key: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{raw:?}: {e}"),
    })
}
