use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::ErrorKind;

/// Public endpoint of the storage service
pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// Environment variable pointing the client at an emulator
pub const EMULATOR_HOST_VAR: &str = "STORAGE_EMULATOR_HOST";

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Settings for a [crate::Storage] client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base URL every request and signed URL is built from
    #[serde(default = "default_endpoint")]
    pub endpoint: Url,
    /// Per-request timeout for JSON API calls
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// When set, the background driver asks the credential provider for a
    /// token on this interval so it is warm before callers need it
    #[serde(default)]
    pub token_refresh_seconds: Option<u64>,
}

fn default_endpoint() -> Url {
    // The constant is a well-formed absolute URL.
    Url::parse(DEFAULT_ENDPOINT).expect("default endpoint is a valid URL")
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            token_refresh_seconds: None,
        }
    }
}

impl StorageConfig {
    /// Default settings, with the endpoint replaced by `STORAGE_EMULATOR_HOST`
    /// when that variable is set. A bare `host:port` is given an `http://`
    /// scheme.
    pub fn from_env() -> Result<Self, ErrorKind> {
        match std::env::var(EMULATOR_HOST_VAR) {
            Ok(host) if !host.trim().is_empty() => {
                Ok(Self::default().with_endpoint(parse_emulator_host(host.trim())?))
            }
            _ => Ok(Self::default()),
        }
    }

    /// Use a different endpoint
    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Use a different per-request timeout, rounded up to whole seconds
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let partial = u64::from(timeout.subsec_nanos() > 0);
        self.timeout_seconds = timeout.as_secs().saturating_add(partial);
        self
    }

    /// Refresh the bearer token in the background on the given interval
    pub fn with_token_refresh(mut self, interval: Duration) -> Self {
        self.token_refresh_seconds = Some(interval.as_secs());
        self
    }

    /// The per-request timeout, never shorter than one second
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }

    /// The background refresh interval, if enabled
    pub fn token_refresh(&self) -> Option<Duration> {
        self.token_refresh_seconds
            .filter(|seconds| *seconds > 0)
            .map(Duration::from_secs)
    }
}

fn parse_emulator_host(host: &str) -> Result<Url, ErrorKind> {
    let candidate = if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{host}")
    };

    Url::parse(&candidate).map_err(|error| {
        ErrorKind::InvalidInput(format!("Invalid {EMULATOR_HOST_VAR} {host:?}: {error}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_defaults_to_the_public_endpoint() {
        let config = StorageConfig::default();

        assert_eq!(config.endpoint.as_str(), "https://storage.googleapis.com/");
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.token_refresh(), None);
    }

    #[test]
    fn it_adds_a_scheme_to_bare_emulator_hosts() {
        assert_eq!(
            parse_emulator_host("localhost:9023").unwrap().as_str(),
            "http://localhost:9023/"
        );
        assert_eq!(
            parse_emulator_host("https://gcs.test").unwrap().as_str(),
            "https://gcs.test/"
        );
    }

    #[test]
    fn it_fills_missing_fields_when_deserializing() {
        let config: StorageConfig =
            serde_json::from_str(r#"{ "token_refresh_seconds": 300 }"#).unwrap();

        assert_eq!(config.endpoint.as_str(), "https://storage.googleapis.com/");
        assert_eq!(config.timeout_seconds, 30);
        assert_eq!(config.token_refresh(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn it_applies_builder_settings() {
        let config = StorageConfig::default()
            .with_timeout(Duration::from_secs(5))
            .with_token_refresh(Duration::from_secs(120));

        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.token_refresh(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn it_never_uses_a_zero_timeout() {
        let config = StorageConfig::default().with_timeout(Duration::from_millis(500));
        assert_eq!(config.timeout_seconds, 1);
        assert_eq!(config.timeout(), Duration::from_secs(1));

        let config = StorageConfig::default().with_timeout(Duration::from_millis(2_500));
        assert_eq!(config.timeout(), Duration::from_secs(3));

        let config: StorageConfig = serde_json::from_str(r#"{ "timeout_seconds": 0 }"#).unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(1));
    }
}
