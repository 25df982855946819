//! Available-message FIFO and lock table shared by the queue variants.
//!
//! Both structures sit behind a single mutex. Critical sections are plain
//! deque/map operations and never await, so a blocking `std::sync::Mutex` is
//! used. Waiting receivers park on a [`Notify`] that every enqueue triggers.

use crate::locks::{LockTable, LockedMessage};
use crate::message::{LockToken, MessageEnvelope};
use chrono::Duration;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;

#[derive(Debug, Default)]
struct StoreState {
    available: VecDeque<MessageEnvelope>,
    locks: LockTable,
}

#[derive(Debug, Default)]
pub(crate) struct MessageStore {
    state: Mutex<StoreState>,
    arrivals: Notify,
}

impl MessageStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append to the tail and wake waiting receivers
    pub(crate) fn enqueue(&self, mut envelope: MessageEnvelope) {
        envelope.clear_lock_token();
        self.state().available.push_back(envelope);
        self.arrivals.notify_waiters();
    }

    /// Remove every available message, oldest first
    pub(crate) fn drain_available(&self) -> Vec<MessageEnvelope> {
        self.state().available.drain(..).collect()
    }

    pub(crate) fn available_len(&self) -> usize {
        self.state().available.len()
    }

    pub(crate) fn locked_len(&self) -> usize {
        self.state().locks.len()
    }

    pub(crate) fn peek(&self) -> Option<MessageEnvelope> {
        self.state().available.front().cloned()
    }

    pub(crate) fn peek_batch(&self, count: usize) -> Vec<MessageEnvelope> {
        self.state().available.iter().take(count).cloned().collect()
    }

    /// Record a lock for a message that did not come through the FIFO
    pub(crate) fn lock(
        &self,
        envelope: MessageEnvelope,
        lock_timeout: Duration,
    ) -> MessageEnvelope {
        self.state().locks.lock(envelope, lock_timeout)
    }

    /// Dequeue and lock the head message, if any.
    ///
    /// The lock is recorded before the head leaves the FIFO.
    pub(crate) fn try_checkout(&self, lock_timeout: Duration) -> Option<MessageEnvelope> {
        let mut state = self.state();
        let head = state.available.front()?.clone();
        let locked = state.locks.lock(head, lock_timeout);
        state.available.pop_front();
        Some(locked)
    }

    /// Dequeue and lock the head message, waiting up to `wait_timeout` for one.
    ///
    /// Returns `None` when the wait runs out or `cancel` fires.
    pub(crate) async fn checkout(
        &self,
        wait_timeout: Duration,
        lock_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Option<MessageEnvelope> {
        let deadline = deadline_after(wait_timeout);

        loop {
            // Register interest before looking so an enqueue between the
            // check and the wait is not missed.
            let notified = self.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(envelope) = self.try_checkout(lock_timeout) {
                return Some(envelope);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => return self.try_checkout(lock_timeout),
                _ = cancel.cancelled() => return None,
            }
        }
    }

    /// Renew a live lock; `false` when unknown or expired
    pub(crate) fn renew(&self, token: LockToken, lock_timeout: Duration) -> bool {
        self.state().locks.renew(token, lock_timeout)
    }

    /// Remove a lock entry regardless of expiry
    pub(crate) fn release(&self, token: LockToken) -> Option<LockedMessage> {
        self.state().locks.remove(token)
    }

    pub(crate) fn expired_tokens(&self) -> Vec<LockToken> {
        self.state().locks.expired_tokens()
    }

    /// Drop all available and locked messages
    pub(crate) fn clear(&self) {
        let mut state = self.state();
        state.available.clear();
        state.locks.clear();
    }
}

/// Instant `wait` from now; waits beyond the clock's range become a very distant deadline
fn deadline_after(wait: Duration) -> Instant {
    let now = Instant::now();
    let wait = wait.to_std().unwrap_or_default();
    now.checked_add(wait)
        .unwrap_or_else(|| now + std::time::Duration::from_secs(FAR_FUTURE_SECS))
}

/// Roughly thirty years
const FAR_FUTURE_SECS: u64 = 86_400 * 365 * 30;
