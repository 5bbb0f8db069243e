// Configuration for the search backend client, the package store and the poller

use crate::client::ClientError;
use std::env;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_STORE_URL: &str = "http://localhost:5000/api";

// Login for the search backend's token endpoint
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_empty() || self.password.is_empty()
    }
}

// Keep the password out of logs
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub store_base_url: String,
    pub credentials: Credentials,
    pub timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            store_base_url: DEFAULT_STORE_URL.to_string(),
            credentials: Credentials::default(),
            timeout_ms: 30_000,
        }
    }
}

impl ClientConfig {
    /// Build a configuration from `TRAVEL_API_URL`, `TRAVEL_API_USERNAME`,
    /// `TRAVEL_API_PASSWORD` and `TRAVEL_STORE_URL`, falling back to the
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ClientError> {
        let defaults = Self::default();
        let config = Self {
            base_url: lookup("TRAVEL_API_URL").unwrap_or(defaults.base_url),
            store_base_url: lookup("TRAVEL_STORE_URL").unwrap_or(defaults.store_base_url),
            credentials: Credentials::new(
                lookup("TRAVEL_API_USERNAME").unwrap_or_default(),
                lookup("TRAVEL_API_PASSWORD").unwrap_or_default(),
            ),
            timeout_ms: defaults.timeout_ms,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        for (name, url) in [("base_url", &self.base_url), ("store_base_url", &self.store_base_url)] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ClientError::ConfigError(format!(
                    "{} must be an http(s) URL, got {:?}",
                    name, url
                )));
            }
        }
        if self.timeout_ms == 0 {
            return Err(ClientError::ConfigError(
                "timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// Cadence and failure policy for polling one job
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub poll_interval_ms: u64,
    pub max_consecutive_failures: u32,
    pub request_timeout_ms: u64,
    pub fetch_timeout_ms: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3_000,
            max_consecutive_failures: 5,
            request_timeout_ms: 30_000,
            // result payloads are large and slow to assemble upstream
            fetch_timeout_ms: 300_000,
        }
    }
}

impl PollerConfig {
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.poll_interval_ms == 0 {
            return Err(ClientError::ConfigError(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_consecutive_failures == 0 {
            return Err(ClientError::ConfigError(
                "max_consecutive_failures must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

// Backoff policy for retrying transient package-store failures
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff with jitter before retry number `retry_attempt` (zero-based).
    pub fn backoff(&self, retry_attempt: u32) -> Duration {
        let base_ms = (self.initial_backoff_ms as f64
            * self.backoff_multiplier.powf(retry_attempt as f64))
        .min(self.max_backoff_ms as f64);

        let jitter = rand::random::<f64>() * self.jitter_factor * base_ms;
        let backoff_ms = base_ms * (1.0 - self.jitter_factor / 2.0) + jitter;
        Duration::from_millis(backoff_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_poller_defaults() {
        let config = PollerConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(3));
        assert_eq!(config.max_consecutive_failures, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let retry = RetryConfig::default();
        for _ in 0..20 {
            let first = retry.backoff(0).as_millis();
            assert!((95..=105).contains(&first), "first backoff {}ms", first);

            let third = retry.backoff(2).as_millis();
            assert!((380..=420).contains(&third), "third backoff {}ms", third);

            assert!(retry.backoff(30).as_millis() <= 10_500);
        }
    }

    #[test]
    fn test_backoff_without_jitter_is_exact() {
        let retry = RetryConfig {
            jitter_factor: 0.0,
            ..Default::default()
        };
        assert_eq!(retry.backoff(1), Duration::from_millis(200));
        assert_eq!(retry.backoff(20), Duration::from_millis(10_000));
    }

    #[test]
    fn test_poller_rejects_zero_ceiling() {
        let config = PollerConfig {
            max_consecutive_failures: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ClientError::ConfigError(_))));
    }

    #[test]
    fn test_client_config_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("TRAVEL_API_URL", "https://search.example.com"),
            ("TRAVEL_API_USERNAME", "agent"),
            ("TRAVEL_API_PASSWORD", "secret"),
        ]);
        let config =
            ClientConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();

        assert_eq!(config.base_url, "https://search.example.com");
        assert_eq!(config.store_base_url, DEFAULT_STORE_URL);
        assert_eq!(config.credentials.username, "agent");
        assert!(!format!("{:?}", config.credentials).contains("secret"));
    }

    #[test]
    fn test_client_config_rejects_bad_url() {
        let result = ClientConfig::from_lookup(|key| {
            (key == "TRAVEL_API_URL").then(|| "localhost:8000".to_string())
        });
        assert!(matches!(result, Err(ClientError::ConfigError(_))));
    }
}
