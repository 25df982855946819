//! Declared feature set of a queue instance.
//!
//! Every queue publishes a [`MessagingCapabilities`] value when it is built.
//! The lifecycle guard consults it before each data operation, so a backend
//! that cannot peek fails `peek` with
//! [`QueueError::UnsupportedOperation`](crate::QueueError::UnsupportedOperation)
//! instead of returning an empty result.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operations that are gated by a capability flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueOperation {
    MessageCount,
    Send,
    Receive,
    Peek,
    PeekBatch,
    RenewLock,
    Abandon,
    DeadLetter,
    Clear,
}

impl QueueOperation {
    /// All gated operations, in declaration order
    pub const ALL: [QueueOperation; 9] = [
        Self::MessageCount,
        Self::Send,
        Self::Receive,
        Self::Peek,
        Self::PeekBatch,
        Self::RenewLock,
        Self::Abandon,
        Self::DeadLetter,
        Self::Clear,
    ];

    /// Stable snake_case name used in errors and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageCount => "message_count",
            Self::Send => "send",
            Self::Receive => "receive",
            Self::Peek => "peek",
            Self::PeekBatch => "peek_batch",
            Self::RenewLock => "renew_lock",
            Self::Abandon => "abandon",
            Self::DeadLetter => "dead_letter",
            Self::Clear => "clear",
        }
    }
}

impl fmt::Display for QueueOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which operations a queue backend actually supports.
///
/// Values are fixed once a queue is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagingCapabilities {
    pub can_message_count: bool,
    pub can_send: bool,
    pub can_receive: bool,
    pub can_peek: bool,
    pub can_peek_batch: bool,
    pub can_renew_lock: bool,
    pub can_abandon: bool,
    pub can_dead_letter: bool,
    pub can_clear: bool,
}

impl MessagingCapabilities {
    /// Every operation supported
    pub const fn all() -> Self {
        Self {
            can_message_count: true,
            can_send: true,
            can_receive: true,
            can_peek: true,
            can_peek_batch: true,
            can_renew_lock: true,
            can_abandon: true,
            can_dead_letter: true,
            can_clear: true,
        }
    }

    /// No operation supported; combine with struct update syntax
    pub const fn none() -> Self {
        Self {
            can_message_count: false,
            can_send: false,
            can_receive: false,
            can_peek: false,
            can_peek_batch: false,
            can_renew_lock: false,
            can_abandon: false,
            can_dead_letter: false,
            can_clear: false,
        }
    }

    /// Check whether an operation is declared
    pub fn supports(&self, operation: QueueOperation) -> bool {
        match operation {
            QueueOperation::MessageCount => self.can_message_count,
            QueueOperation::Send => self.can_send,
            QueueOperation::Receive => self.can_receive,
            QueueOperation::Peek => self.can_peek,
            QueueOperation::PeekBatch => self.can_peek_batch,
            QueueOperation::RenewLock => self.can_renew_lock,
            QueueOperation::Abandon => self.can_abandon,
            QueueOperation::DeadLetter => self.can_dead_letter,
            QueueOperation::Clear => self.can_clear,
        }
    }

    /// Supported operations, in declaration order
    pub fn supported(&self) -> Vec<QueueOperation> {
        QueueOperation::ALL
            .into_iter()
            .filter(|op| self.supports(*op))
            .collect()
    }
}

impl Default for MessagingCapabilities {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Display for MessagingCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.supported().iter().map(|op| op.as_str()).collect();
        write!(f, "[{}]", names.join(","))
    }
}

#[cfg(test)]
#[path = "capabilities_tests.rs"]
mod tests;
