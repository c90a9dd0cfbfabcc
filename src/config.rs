//! Environment-driven configuration.

use anyhow::Context;
use chrono::Duration;

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP listener binds to.
    pub bind_addr: String,
    /// Session lifetime.
    pub session_ttl: Duration,
    /// Whether session cookies carry the `Secure` attribute. Disable only
    /// for plain-HTTP local development.
    pub secure_cookies: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4000".to_string(),
            session_ttl: Duration::hours(12),
            secure_cookies: true,
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults for
    /// unset variables.
    ///
    /// Recognized variables: `SNIPBIN_ADDR`, `SNIPBIN_SESSION_TTL_HOURS`,
    /// `SNIPBIN_SECURE_COOKIES`.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("SNIPBIN_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(hours) = std::env::var("SNIPBIN_SESSION_TTL_HOURS") {
            let hours: i64 = hours
                .parse()
                .context("SNIPBIN_SESSION_TTL_HOURS must be an integer")?;
            anyhow::ensure!(hours > 0, "SNIPBIN_SESSION_TTL_HOURS must be positive");
            config.session_ttl = Duration::hours(hours);
        }
        if let Ok(secure) = std::env::var("SNIPBIN_SECURE_COOKIES") {
            config.secure_cookies = secure
                .parse()
                .context("SNIPBIN_SECURE_COOKIES must be true or false")?;
        }
        Ok(config)
    }
}
