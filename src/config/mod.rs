//! Configuration loading and management
//!
//! [`ClientConfig`] is what the client runs with. [`ClientSettings`] is its
//! declarative counterpart that can be loaded from YAML:
//!
//! ```yaml
//! endpoints:
//!   - ws://primary:8080
//!   - ws://fallback:8080
//! reconnect_interval_ms: 1000
//! response_timeout_ms: 5000
//! protocol_version: "1.2.0"
//! ```

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Protocol version requested during the handshake unless configured otherwise
pub const DEFAULT_PROTOCOL_VERSION: &str = "1.2.0";

/// Default wait between two connection attempts
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Default deadline for a correlated response
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Produces the endpoint for each (re)connect attempt
pub type UriProvider = Arc<dyn Fn() -> String + Send + Sync>;

/// Runtime configuration of a client
#[derive(Clone)]
pub struct ClientConfig {
    /// Invoked once per connection attempt
    pub uri_provider: UriProvider,

    /// Wait between two connection attempts
    pub reconnect_interval: Duration,

    /// Deadline for each request's response
    pub response_timeout: Duration,

    /// Version string sent in the `version` handshake
    pub protocol_version: String,
}

impl ClientConfig {
    /// Create a configuration with default timings
    pub fn new<F>(uri_provider: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self {
            uri_provider: Arc::new(uri_provider),
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
        }
    }

    /// Configuration for a single fixed endpoint
    pub fn for_uri(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        Self::new(move || uri.clone())
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }

    /// Endpoint for the next connection attempt
    pub fn next_uri(&self) -> String {
        (self.uri_provider)()
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("reconnect_interval", &self.reconnect_interval)
            .field("response_timeout", &self.response_timeout)
            .field("protocol_version", &self.protocol_version)
            .finish_non_exhaustive()
    }
}

/// Declarative client settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSettings {
    /// Endpoints tried in round-robin order
    pub endpoints: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_interval_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
}

impl ClientSettings {
    /// Load settings from a YAML file
    pub fn from_yaml_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Load settings from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let settings: Self = serde_yaml::from_str(yaml)?;
        Ok(settings)
    }

    /// Build the runtime configuration
    ///
    /// The uri provider rotates through `endpoints`, one step per connection attempt.
    pub fn into_config(self) -> Result<ClientConfig> {
        if self.endpoints.is_empty() {
            bail!("client settings must list at least one endpoint");
        }

        let endpoints = self.endpoints;
        let cursor = AtomicUsize::new(0);
        let mut config = ClientConfig::new(move || {
            let i = cursor.fetch_add(1, Ordering::Relaxed);
            endpoints[i % endpoints.len()].clone()
        });

        if let Some(ms) = self.reconnect_interval_ms {
            config.reconnect_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.response_timeout_ms {
            config.response_timeout = Duration::from_millis(ms);
        }
        if let Some(version) = self.protocol_version {
            config.protocol_version = version;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::for_uri("ws://localhost:8080");

        assert_eq!(config.next_uri(), "ws://localhost:8080");
        assert_eq!(config.reconnect_interval, Duration::from_secs(1));
        assert_eq!(config.response_timeout, Duration::from_secs(5));
        assert_eq!(config.protocol_version, "1.2.0");
    }

    #[test]
    fn test_builder_setters() {
        let config = ClientConfig::for_uri("ws://localhost:8080")
            .with_reconnect_interval(Duration::from_millis(250))
            .with_response_timeout(Duration::from_millis(100))
            .with_protocol_version("1.1.0");

        assert_eq!(config.reconnect_interval, Duration::from_millis(250));
        assert_eq!(config.response_timeout, Duration::from_millis(100));
        assert_eq!(config.protocol_version, "1.1.0");
    }

    #[test]
    fn test_settings_rotate_endpoints() {
        let settings = ClientSettings::from_yaml_str(
            "endpoints:\n  - ws://a:8080\n  - ws://b:8080\nresponse_timeout_ms: 750\n",
        )
        .unwrap();
        let config = settings.into_config().unwrap();

        assert_eq!(config.next_uri(), "ws://a:8080");
        assert_eq!(config.next_uri(), "ws://b:8080");
        assert_eq!(config.next_uri(), "ws://a:8080");
        assert_eq!(config.response_timeout, Duration::from_millis(750));
        assert_eq!(config.reconnect_interval, DEFAULT_RECONNECT_INTERVAL);
    }

    #[test]
    fn test_settings_require_endpoint() {
        let settings = ClientSettings::from_yaml_str("endpoints: []\n").unwrap();
        assert!(settings.into_config().is_err());
    }

    #[test]
    fn test_yaml_serialization() {
        let settings = ClientSettings {
            endpoints: vec!["ws://localhost:8080".to_string()],
            reconnect_interval_ms: Some(500),
            response_timeout_ms: None,
            protocol_version: Some("1.2.0".to_string()),
        };
        let yaml = serde_yaml::to_string(&settings).unwrap();

        let parsed = ClientSettings::from_yaml_str(&yaml).unwrap();
        assert_eq!(parsed, settings);
    }
}
