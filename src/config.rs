use crate::error::{Error, Result};
use log::{debug, warn};
use std::env;
use std::time::Duration;
use url::Url;

// Load environment variables from config.env
fn load_env() {
    if dotenv::from_filename("config.env").is_err() {
        // Fall back to a plain .env file if one exists
        dotenv::dotenv().ok();
    }
}

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;

/// Validate and normalize a backend base URL.
///
/// The URL must be absolute with an http(s) scheme; a missing scheme gets
/// https prepended before validation. Trailing slashes are stripped so paths
/// can be appended verbatim.
pub fn normalize_base_url(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let candidate = if !raw.starts_with("http") {
        format!("https://{}", raw)
    } else {
        raw.to_string()
    };

    let parsed = Url::parse(&candidate)?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(Error::Config(format!(
            "unsupported URL scheme '{}' in base URL",
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none() {
        return Err(Error::Config(format!("base URL '{}' has no host", raw)));
    }

    Ok(candidate.trim_end_matches('/').to_string())
}

/// Which paths the backend exposes. Deployments disagree on the exact names
/// (`/bot/enable` vs `/bot/start`), so every path can be overridden from the
/// environment instead of being hard-coded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointProfile {
    pub health: String,
    pub bot_config: String,
    pub bot_enable: String,
    pub bot_disable: String,
    pub analyze: String,
    pub live_signal: String,
    /// Some deployments require the API key on GET endpoints as well
    pub authed_reads: bool,
}

impl Default for EndpointProfile {
    fn default() -> Self {
        Self {
            health: "/health".to_string(),
            bot_config: "/bot/config".to_string(),
            bot_enable: "/bot/enable".to_string(),
            bot_disable: "/bot/disable".to_string(),
            analyze: "/analyze".to_string(),
            live_signal: "/signal/live".to_string(),
            authed_reads: false,
        }
    }
}

fn env_path(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => {
            let value = value.trim().to_string();
            let value = if value.starts_with('/') {
                value
            } else {
                format!("/{}", value)
            };
            debug!("Using {} override: {}", key, value);
            value
        }
        _ => default.to_string(),
    }
}

impl EndpointProfile {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            health: env_path("HEALTH_PATH", &defaults.health),
            bot_config: env_path("BOT_CONFIG_PATH", &defaults.bot_config),
            bot_enable: env_path("BOT_ENABLE_PATH", &defaults.bot_enable),
            bot_disable: env_path("BOT_DISABLE_PATH", &defaults.bot_disable),
            analyze: env_path("ANALYZE_PATH", &defaults.analyze),
            live_signal: env_path("LIVE_SIGNAL_PATH", &defaults.live_signal),
            authed_reads: env::var("AUTHED_READS")
                .unwrap_or_else(|_| "false".to_string())
                .to_lowercase()
                == "true",
        }
    }
}

/// Connection parameters for the signal backend. Built once per session; an
/// in-flight request keeps the values captured at call start even if the
/// operator reconfigures afterwards.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Absolute backend URL, no trailing slash
    pub base_url: String,
    /// Credential sent as the x-api-key header
    pub api_key: String,
    /// Client-enforced bound on every request
    pub timeout: Duration,
    /// Period of the signal poller while the bot is enabled
    pub poll_interval: Duration,
    pub endpoints: EndpointProfile,
}

impl ClientConfig {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            api_key: api_key.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            endpoints: EndpointProfile::default(),
        })
    }

    /// Load the configuration from the environment (config.env is honored).
    pub fn from_env() -> Result<Self> {
        load_env();

        let base_url = env::var("API_BASE_URL").unwrap_or_else(|_| {
            warn!("API_BASE_URL not set, using {}", DEFAULT_BASE_URL);
            DEFAULT_BASE_URL.to_string()
        });

        let api_key = env::var("API_KEY").unwrap_or_else(|_| {
            warn!("API_KEY not set, authenticated endpoints will be rejected by the backend");
            String::new()
        });

        let timeout_secs = env::var("REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let poll_secs = env::var("POLL_INTERVAL_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);

        Ok(Self {
            base_url: normalize_base_url(&base_url)?,
            api_key,
            timeout: Duration::from_secs(timeout_secs),
            poll_interval: Duration::from_secs(poll_secs),
            endpoints: EndpointProfile::from_env(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        self.base_url = normalize_base_url(base_url)?;
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_stripped() {
        let config = ClientConfig::new("http://localhost:8080/", "key").unwrap();
        assert_eq!(config.base_url, "http://localhost:8080");
    }

    #[test]
    fn missing_scheme_gets_https() {
        let config = ClientConfig::new("backend.example.com", "key").unwrap();
        assert_eq!(config.base_url, "https://backend.example.com");
    }

    #[test]
    fn malformed_url_is_rejected() {
        assert!(ClientConfig::new("http://", "key").is_err());
        assert!(ClientConfig::new("", "key").is_err());
    }

    #[test]
    fn default_endpoint_profile() {
        let endpoints = EndpointProfile::default();
        assert_eq!(endpoints.health, "/health");
        assert_eq!(endpoints.bot_config, "/bot/config");
        assert_eq!(endpoints.bot_enable, "/bot/enable");
        assert_eq!(endpoints.bot_disable, "/bot/disable");
        assert_eq!(endpoints.analyze, "/analyze");
        assert_eq!(endpoints.live_signal, "/signal/live");
        assert!(!endpoints.authed_reads);
    }
}
