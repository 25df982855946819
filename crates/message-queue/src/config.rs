//! Queue configuration.
//!
//! Configuration is plain serde data with defaults for every field, so a queue
//! can be built from an empty document. [`QueueConfig::load`] reads a file and
//! applies `MQ__`-prefixed environment overrides on top of it.

use crate::error::{ConfigurationError, ValidationError};
use crate::message::QueueName;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Prefix for environment variable overrides, e.g. `MQ__OPTIONS__AUTOSUBSCRIBE`
pub const ENV_PREFIX: &str = "MQ";

/// Listen poll interval used when none (or zero) is configured
pub const DEFAULT_LISTEN_INTERVAL_MS: u64 = 1000;

/// Configuration for a single queue instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue name
    pub name: Option<String>,

    /// Legacy spelling of `name`, used when `name` is absent
    pub queue: Option<String>,

    /// Behavioural options
    pub options: QueueOptions,

    /// Single broker endpoint
    pub connection: Option<ConnectionParams>,

    /// Additional broker endpoints
    pub connections: Vec<ConnectionParams>,

    /// Credential presented to the broker
    pub credential: Option<CredentialParams>,
}

impl QueueConfig {
    /// Configuration for a queue with the given name and default options
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    /// Load configuration from a file, then apply environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Resolve the queue name from `name`, then `queue`, else generate one
    pub fn queue_name(&self) -> Result<QueueName, ValidationError> {
        match self
            .name
            .as_deref()
            .or(self.queue.as_deref())
            .filter(|name| !name.trim().is_empty())
        {
            Some(name) => QueueName::new(name.trim().to_string()),
            None => Ok(QueueName::generate()),
        }
    }

    /// Every configured endpoint, `connection` first
    pub fn all_connections(&self) -> Vec<ConnectionParams> {
        self.connection
            .iter()
            .chain(self.connections.iter())
            .cloned()
            .collect()
    }
}

/// Queue behaviour options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueOptions {
    /// Subscribe to the backing broker when the queue opens rather than on first use
    pub autosubscribe: bool,

    /// Poll interval of the listen loop, also the lock timeout for dispatched messages
    pub listen_interval_ms: u64,
}

impl QueueOptions {
    /// Listen poll interval; zero falls back to the default
    pub fn listen_interval(&self) -> Duration {
        let millis = match self.listen_interval_ms {
            0 => DEFAULT_LISTEN_INTERVAL_MS,
            millis => millis.min(i64::MAX as u64),
        };
        Duration::milliseconds(millis as i64)
    }
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            autosubscribe: false,
            listen_interval_ms: DEFAULT_LISTEN_INTERVAL_MS,
        }
    }
}

/// Broker endpoint description
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionParams {
    /// Full endpoint URI; takes precedence over the individual parts
    pub uri: Option<String>,
    pub protocol: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl ConnectionParams {
    /// Endpoint from a URI
    pub fn from_uri(uri: &str) -> Self {
        Self {
            uri: Some(uri.to_string()),
            ..Self::default()
        }
    }

    /// Endpoint from protocol, host and port
    pub fn from_parts(protocol: &str, host: &str, port: u16) -> Self {
        Self {
            uri: None,
            protocol: Some(protocol.to_string()),
            host: Some(host.to_string()),
            port: Some(port),
        }
    }

    /// Check that the endpoint can be addressed
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let has_uri = self.uri.as_deref().is_some_and(|uri| !uri.is_empty());
        let has_host = self.host.as_deref().is_some_and(|host| !host.is_empty());
        if has_uri || has_host {
            Ok(())
        } else {
            Err(ConfigurationError::Invalid {
                message: "connection requires either uri or host".to_string(),
            })
        }
    }

    /// Address in URI form
    pub fn address(&self) -> String {
        if let Some(uri) = &self.uri {
            return uri.clone();
        }

        let host = self.host.as_deref().unwrap_or_default();
        match (&self.protocol, self.port) {
            (Some(protocol), Some(port)) => format!("{}://{}:{}", protocol, host, port),
            (Some(protocol), None) => format!("{}://{}", protocol, host),
            (None, Some(port)) => format!("{}:{}", host, port),
            (None, None) => host.to_string(),
        }
    }
}

impl fmt::Display for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address())
    }
}

/// Broker credential
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialParams {
    pub username: Option<String>,
    pub password: Option<String>,
    pub access_key: Option<String>,
}

impl fmt::Debug for CredentialParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialParams")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("access_key", &self.access_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
