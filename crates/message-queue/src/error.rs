//! Errors raised by queues, configuration and envelope codecs.

use crate::capabilities::QueueOperation;
use crate::lifecycle::LifecycleState;
use chrono::Duration;
use thiserror::Error;

/// Error returned by every queue operation
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue '{queue}' is {state}, operation requires it to be open")]
    NotOpen { queue: String, state: LifecycleState },

    #[error("Queue '{queue}' cannot change lifecycle state while {state}")]
    InvalidState { queue: String, state: LifecycleState },

    #[error("Operation '{operation}' is not supported by queue '{queue}'")]
    UnsupportedOperation {
        queue: String,
        operation: QueueOperation,
    },

    #[error("Backend error ({queue}): {message}")]
    Backend { queue: String, message: String },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl QueueError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NotOpen { .. } => false,
            Self::InvalidState { .. } => true, // Opening/closing settles quickly
            Self::UnsupportedOperation { .. } => false,
            Self::Backend { .. } => true,
            Self::Serialization(_) => false,
            Self::Configuration(_) => false,
            Self::Validation(_) => false,
        }
    }

    /// Check if error should be retried
    pub fn should_retry(&self) -> bool {
        self.is_transient()
    }

    /// Get suggested retry delay
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::InvalidState { .. } => Some(Duration::milliseconds(100)),
            Self::Backend { .. } => Some(Duration::seconds(5)),
            _ => None,
        }
    }

    /// Build a backend error for the named queue
    pub fn backend(queue: &str, message: impl Into<String>) -> Self {
        Self::Backend {
            queue: queue.to_string(),
            message: message.into(),
        }
    }
}

/// Errors during message payload encoding/decoding
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Message payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        Self::Parsing {
            message: err.to_string(),
        }
    }
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
