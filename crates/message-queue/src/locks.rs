//! Lock bookkeeping for checked-out messages.
//!
//! A [`LockedMessage`] records who holds a message and until when. The
//! [`LockTable`] issues lock tokens and owns the entries. Expiry is evaluated
//! lazily: nothing sweeps the table, an expired entry is only noticed when a
//! renewal or abandon probes its token.

use crate::message::{LockToken, MessageEnvelope, Timestamp};
use chrono::Duration;
use std::collections::HashMap;

#[cfg(test)]
#[path = "locks_tests.rs"]
mod tests;

/// A message that is checked out and awaiting disposition
#[derive(Debug, Clone)]
pub struct LockedMessage {
    message: MessageEnvelope,
    timeout: Duration,
    expiration_time: Timestamp,
}

impl LockedMessage {
    /// Lock a message for `timeout` starting now
    pub fn new(message: MessageEnvelope, timeout: Duration) -> Self {
        Self {
            message,
            timeout,
            expiration_time: Timestamp::after(timeout),
        }
    }

    pub fn message(&self) -> &MessageEnvelope {
        &self.message
    }

    /// Timeout requested at checkout or at the last renewal
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn expiration_time(&self) -> &Timestamp {
        &self.expiration_time
    }

    /// Check if the lock has run out
    pub fn is_expired(&self) -> bool {
        Timestamp::now() >= self.expiration_time
    }

    /// Reset the expiration to `now + timeout`.
    ///
    /// The previous expiration is discarded, repeated renewals do not add up.
    pub fn renew(&mut self, timeout: Duration) {
        self.timeout = timeout;
        self.expiration_time = Timestamp::after(timeout);
    }

    pub fn into_message(self) -> MessageEnvelope {
        self.message
    }
}

/// Checked-out messages keyed by lock token
#[derive(Debug, Default)]
pub(crate) struct LockTable {
    entries: HashMap<LockToken, LockedMessage>,
    last_token: u64,
}

impl LockTable {
    #[cfg(test)]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Issue the next token, stamp it on the message and record the lock.
    ///
    /// Returns the caller's copy of the stamped envelope.
    pub(crate) fn lock(
        &mut self,
        mut message: MessageEnvelope,
        timeout: Duration,
    ) -> MessageEnvelope {
        self.last_token += 1;
        let token = LockToken::new(self.last_token);

        message.set_lock_token(token);
        self.entries
            .insert(token, LockedMessage::new(message.clone(), timeout));
        message
    }

    /// Renew a live lock; returns `false` when the token is unknown or expired
    pub(crate) fn renew(&mut self, token: LockToken, timeout: Duration) -> bool {
        match self.entries.get_mut(&token) {
            Some(locked) if !locked.is_expired() => {
                locked.renew(timeout);
                true
            }
            _ => false,
        }
    }

    /// Remove the entry for a token regardless of its expiry
    pub(crate) fn remove(&mut self, token: LockToken) -> Option<LockedMessage> {
        self.entries.remove(&token)
    }

    #[cfg(test)]
    pub(crate) fn get(&self, token: LockToken) -> Option<&LockedMessage> {
        self.entries.get(&token)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Tokens whose locks have run out but were never probed
    pub(crate) fn expired_tokens(&self) -> Vec<LockToken> {
        let mut tokens: Vec<LockToken> = self
            .entries
            .iter()
            .filter(|(_, locked)| locked.is_expired())
            .map(|(token, _)| *token)
            .collect();
        tokens.sort();
        tokens
    }

    /// Drop every entry; token numbering continues
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
