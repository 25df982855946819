//! Connection and credential resolution.
//!
//! Queues never discover endpoints themselves. A queue that talks to a broker
//! asks a [`ConnectionResolver`] for endpoints and a [`CredentialResolver`]
//! for the credential when it opens. [`ConfigConnectionResolver`] serves both
//! from static configuration; discovery services implement the traits
//! directly.

use crate::config::{ConnectionParams, CredentialParams, QueueConfig};
use crate::error::QueueError;
use async_trait::async_trait;

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod tests;

/// Source of broker endpoints
#[async_trait]
pub trait ConnectionResolver: Send + Sync {
    /// Resolve every endpoint available to the caller
    async fn resolve_all(&self, trace_id: Option<&str>)
        -> Result<Vec<ConnectionParams>, QueueError>;
}

/// Source of broker credentials
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Look up the credential, if any is configured
    async fn lookup(&self, trace_id: Option<&str>) -> Result<Option<CredentialParams>, QueueError>;
}

/// Endpoints and credential handed to a backend when a queue opens
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedConnection {
    pub connections: Vec<ConnectionParams>,
    pub credential: Option<CredentialParams>,
}

/// Resolver backed by static configuration
#[derive(Debug, Clone, Default)]
pub struct ConfigConnectionResolver {
    connections: Vec<ConnectionParams>,
    credential: Option<CredentialParams>,
}

impl ConfigConnectionResolver {
    pub fn new(connections: Vec<ConnectionParams>, credential: Option<CredentialParams>) -> Self {
        Self {
            connections,
            credential,
        }
    }

    /// Resolver serving the endpoints and credential of a queue configuration
    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.all_connections(), config.credential.clone())
    }
}

#[async_trait]
impl ConnectionResolver for ConfigConnectionResolver {
    async fn resolve_all(
        &self,
        _trace_id: Option<&str>,
    ) -> Result<Vec<ConnectionParams>, QueueError> {
        for connection in &self.connections {
            connection.validate()?;
        }
        Ok(self.connections.clone())
    }
}

#[async_trait]
impl CredentialResolver for ConfigConnectionResolver {
    async fn lookup(
        &self,
        _trace_id: Option<&str>,
    ) -> Result<Option<CredentialParams>, QueueError> {
        Ok(self.credential.clone())
    }
}
