//! Open/close state machine shared by every queue variant.
//!
//! [`QueueLifecycle`] owns the queue's identity, its declared capabilities,
//! the connection resolvers and the cancellation tokens that stop waiting
//! receivers. Queue implementations embed one and call [`QueueLifecycle::guard`]
//! at the top of each data operation, which gives every variant the same
//! not-open and unsupported-operation errors.
//!
//! ```text
//!   Closed --begin_open--> Opening --complete_open--> Open
//!     ^                       |                         |
//!     +------abort_open-------+                    begin_close
//!     |                                                 v
//!     +-----------------complete_close------------- Closing
//! ```

use crate::capabilities::{MessagingCapabilities, QueueOperation};
use crate::error::{ConfigurationError, QueueError};
use crate::message::QueueName;
use crate::resolver::{ConnectionResolver, CredentialResolver, ResolvedConnection};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;

// ============================================================================
// Lifecycle State
// ============================================================================

/// Where a queue is in its open/close cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Closed,
    Opening,
    Open,
    Closing,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct Tokens {
    /// Cancelled when the queue starts closing
    shutdown: CancellationToken,
    /// Child of `shutdown`, replaced each time listening ends
    listen: CancellationToken,
}

impl Tokens {
    fn fresh() -> Self {
        let shutdown = CancellationToken::new();
        let listen = shutdown.child_token();
        Self { shutdown, listen }
    }
}

// ============================================================================
// Queue Lifecycle
// ============================================================================

/// Identity, capabilities and open state of one queue
pub struct QueueLifecycle {
    name: QueueName,
    capabilities: MessagingCapabilities,
    state: Mutex<LifecycleState>,
    tokens: Mutex<Tokens>,
    connection_resolver: Option<Arc<dyn ConnectionResolver>>,
    credential_resolver: Option<Arc<dyn CredentialResolver>>,
}

impl QueueLifecycle {
    /// Create a closed lifecycle
    pub fn new(name: QueueName, capabilities: MessagingCapabilities) -> Self {
        let tokens = Tokens::fresh();
        // A closed queue has nothing to wait on.
        tokens.shutdown.cancel();

        Self {
            name,
            capabilities,
            state: Mutex::new(LifecycleState::Closed),
            tokens: Mutex::new(tokens),
            connection_resolver: None,
            credential_resolver: None,
        }
    }

    pub fn with_connection_resolver(mut self, resolver: Arc<dyn ConnectionResolver>) -> Self {
        self.connection_resolver = Some(resolver);
        self
    }

    pub fn with_credential_resolver(mut self, resolver: Arc<dyn CredentialResolver>) -> Self {
        self.credential_resolver = Some(resolver);
        self
    }

    pub fn name(&self) -> &QueueName {
        &self.name
    }

    pub fn capabilities(&self) -> &MessagingCapabilities {
        &self.capabilities
    }

    pub fn state(&self) -> LifecycleState {
        *self.lock_state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == LifecycleState::Open
    }

    fn lock_state(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tokens(&self) -> MutexGuard<'_, Tokens> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move from closed to opening.
    ///
    /// Returns `Ok(false)` when the queue is already open, in which case the
    /// caller skips its open work.
    pub fn begin_open(&self) -> Result<bool, QueueError> {
        let mut state = self.lock_state();
        match *state {
            LifecycleState::Open => Ok(false),
            LifecycleState::Closed => {
                *state = LifecycleState::Opening;
                *self.lock_tokens() = Tokens::fresh();
                Ok(true)
            }
            other => Err(QueueError::InvalidState {
                queue: self.name.to_string(),
                state: other,
            }),
        }
    }

    /// Finish a successful open
    pub fn complete_open(&self, trace_id: Option<&str>) {
        *self.lock_state() = LifecycleState::Open;
        info!(
            queue = %self.name,
            trace_id = trace_id.unwrap_or_default(),
            "Opened queue"
        );
    }

    /// Roll back a failed open
    pub fn abort_open(&self) {
        self.lock_tokens().shutdown.cancel();
        *self.lock_state() = LifecycleState::Closed;
    }

    /// Move from open to closing and release every waiting receiver.
    ///
    /// Returns `Ok(false)` when the queue is already closed.
    pub fn begin_close(&self) -> Result<bool, QueueError> {
        let mut state = self.lock_state();
        match *state {
            LifecycleState::Closed => Ok(false),
            LifecycleState::Open => {
                *state = LifecycleState::Closing;
                self.lock_tokens().shutdown.cancel();
                Ok(true)
            }
            other => Err(QueueError::InvalidState {
                queue: self.name.to_string(),
                state: other,
            }),
        }
    }

    pub fn complete_close(&self, trace_id: Option<&str>) {
        *self.lock_state() = LifecycleState::Closed;
        info!(
            queue = %self.name,
            trace_id = trace_id.unwrap_or_default(),
            "Closed queue"
        );
    }

    /// Fail with [`QueueError::NotOpen`] unless the queue is open
    pub fn check_open(&self) -> Result<(), QueueError> {
        match self.state() {
            LifecycleState::Open => Ok(()),
            state => Err(QueueError::NotOpen {
                queue: self.name.to_string(),
                state,
            }),
        }
    }

    /// Check that the queue is open and declares `operation`
    pub fn guard(&self, operation: QueueOperation) -> Result<(), QueueError> {
        self.check_open()?;
        if !self.capabilities.supports(operation) {
            return Err(QueueError::UnsupportedOperation {
                queue: self.name.to_string(),
                operation,
            });
        }
        Ok(())
    }

    /// Ask the resolvers for endpoints and credential.
    ///
    /// At least one endpoint is required.
    pub async fn resolve_connection(
        &self,
        trace_id: Option<&str>,
    ) -> Result<ResolvedConnection, QueueError> {
        let resolver = self
            .connection_resolver
            .as_ref()
            .ok_or_else(missing_connection)?;

        let connections = resolver.resolve_all(trace_id).await?;
        if connections.is_empty() {
            return Err(missing_connection());
        }

        let credential = match &self.credential_resolver {
            Some(resolver) => resolver.lookup(trace_id).await?,
            None => None,
        };

        debug!(
            queue = %self.name,
            endpoints = connections.len(),
            has_credential = credential.is_some(),
            "Resolved connection"
        );

        Ok(ResolvedConnection {
            connections,
            credential,
        })
    }

    /// Token cancelled when the queue starts closing
    pub fn shutdown_token(&self) -> CancellationToken {
        self.lock_tokens().shutdown.clone()
    }

    /// Token cancelled by [`end_listen`](Self::end_listen) or by closing
    pub fn listen_token(&self) -> CancellationToken {
        self.lock_tokens().listen.clone()
    }

    /// Stop the current listen loop and arm a fresh token for the next one
    pub fn end_listen(&self) {
        let mut tokens = self.lock_tokens();
        tokens.listen.cancel();
        tokens.listen = tokens.shutdown.child_token();
    }
}

impl fmt::Debug for QueueLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueLifecycle")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .field("state", &self.state())
            .field("connection_resolver", &self.connection_resolver.is_some())
            .field("credential_resolver", &self.credential_resolver.is_some())
            .finish()
    }
}

fn missing_connection() -> QueueError {
    ConfigurationError::Missing {
        key: "connection".to_string(),
    }
    .into()
}
