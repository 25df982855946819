//! In-memory reference queue.
//!
//! This module provides a fully functional queue that keeps every message in
//! process memory:
//! - FIFO delivery of available messages
//! - Lock-based checkout with renewal, abandon and dead-lettering
//! - Blocking receive released by sends and by close
//! - Push delivery through a listen loop
//!
//! Lock expiry is lazy. Nothing sweeps the lock table; an expired lock is only
//! noticed when a renewal or abandon probes its token, so a message whose
//! consumer never disposes of it stays checked out. Use
//! [`MemoryMessageQueue::expired_locks`] to find such messages.
//!
//! Messages survive close and reopen; only [`clear`](MessageQueue::clear)
//! drops them.

use crate::capabilities::{MessagingCapabilities, QueueOperation};
use crate::config::QueueConfig;
use crate::counters::{NoOpCounters, QueueCounterNames, QueueCounters};
use crate::error::QueueError;
use crate::lifecycle::{LifecycleState, QueueLifecycle};
use crate::message::{LockToken, MessageEnvelope, QueueName};
use crate::queue::{dispatch, MessageQueue, MessageReceiver};
use crate::store::MessageStore;
use async_trait::async_trait;
use chrono::Duration;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Queue holding all state in process memory
pub struct MemoryMessageQueue {
    lifecycle: QueueLifecycle,
    store: MessageStore,
    counters: Arc<dyn QueueCounters>,
    counter_names: QueueCounterNames,
    listen_interval: Duration,
}

impl MemoryMessageQueue {
    /// Create a closed queue with every capability
    pub fn new(name: QueueName) -> Self {
        let counter_names = QueueCounterNames::for_queue(name.as_str());
        Self {
            lifecycle: QueueLifecycle::new(name, MessagingCapabilities::all()),
            store: MessageStore::new(),
            counters: Arc::new(NoOpCounters),
            counter_names,
            listen_interval: QueueConfig::default().options.listen_interval(),
        }
    }

    /// Create a queue from configuration, generating a name if none is given
    pub fn from_config(config: &QueueConfig) -> Result<Self, QueueError> {
        let name = config.queue_name()?;
        Ok(Self::new(name).with_listen_interval(config.options.listen_interval()))
    }

    pub fn with_counters(mut self, counters: Arc<dyn QueueCounters>) -> Self {
        self.counters = counters;
        self
    }

    /// Poll interval of the listen loop, also the lock timeout of dispatched messages
    pub fn with_listen_interval(mut self, listen_interval: Duration) -> Self {
        self.listen_interval = listen_interval;
        self
    }

    pub fn queue_name(&self) -> &QueueName {
        self.lifecycle.name()
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn listen_interval(&self) -> Duration {
        self.listen_interval
    }

    /// Number of checked-out messages, expired or not
    pub fn locked_message_count(&self) -> usize {
        self.store.locked_len()
    }

    /// Tokens of checked-out messages whose lock has run out
    pub fn expired_locks(&self) -> Vec<LockToken> {
        self.store.expired_tokens()
    }
}

impl Default for MemoryMessageQueue {
    fn default() -> Self {
        Self::new(QueueName::generate())
    }
}

impl fmt::Debug for MemoryMessageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryMessageQueue")
            .field("lifecycle", &self.lifecycle)
            .field("available", &self.store.available_len())
            .field("locked", &self.store.locked_len())
            .field("listen_interval", &self.listen_interval)
            .finish()
    }
}

#[async_trait]
impl MessageQueue for MemoryMessageQueue {
    fn name(&self) -> &str {
        self.lifecycle.name().as_str()
    }

    fn capabilities(&self) -> &MessagingCapabilities {
        self.lifecycle.capabilities()
    }

    fn is_open(&self) -> bool {
        self.lifecycle.is_open()
    }

    async fn open(&self, trace_id: Option<&str>) -> Result<(), QueueError> {
        if self.lifecycle.begin_open()? {
            self.lifecycle.complete_open(trace_id);
        }
        Ok(())
    }

    async fn close(&self, trace_id: Option<&str>) -> Result<(), QueueError> {
        if self.lifecycle.begin_close()? {
            self.lifecycle.complete_close(trace_id);
        }
        Ok(())
    }

    async fn read_message_count(&self) -> Result<usize, QueueError> {
        self.lifecycle.guard(QueueOperation::MessageCount)?;
        Ok(self.store.available_len())
    }

    async fn send(
        &self,
        trace_id: Option<&str>,
        mut envelope: MessageEnvelope,
    ) -> Result<(), QueueError> {
        self.lifecycle.guard(QueueOperation::Send)?;

        envelope.stamp_sent_time();
        debug!(
            queue = self.name(),
            trace_id = trace_id.unwrap_or_default(),
            message_id = %envelope.message_id(),
            message_type = envelope.message_type(),
            "Sent message"
        );
        self.store.enqueue(envelope);
        self.counters.increment_one(&self.counter_names.sent);

        Ok(())
    }

    async fn peek(&self, _trace_id: Option<&str>) -> Result<Option<MessageEnvelope>, QueueError> {
        self.lifecycle.guard(QueueOperation::Peek)?;
        Ok(self.store.peek())
    }

    async fn peek_batch(
        &self,
        _trace_id: Option<&str>,
        count: usize,
    ) -> Result<Vec<MessageEnvelope>, QueueError> {
        self.lifecycle.guard(QueueOperation::PeekBatch)?;
        Ok(self.store.peek_batch(count))
    }

    async fn receive(
        &self,
        trace_id: Option<&str>,
        wait_timeout: Duration,
    ) -> Result<Option<MessageEnvelope>, QueueError> {
        self.lifecycle.guard(QueueOperation::Receive)?;

        let shutdown = self.lifecycle.shutdown_token();
        let received = self
            .store
            .checkout(wait_timeout, wait_timeout, &shutdown)
            .await;

        if let Some(envelope) = &received {
            self.counters.increment_one(&self.counter_names.received);
            debug!(
                queue = self.name(),
                trace_id = trace_id.unwrap_or_default(),
                message_id = %envelope.message_id(),
                lock_token = ?envelope.lock_token(),
                "Received message"
            );
        }

        Ok(received)
    }

    async fn renew_lock(
        &self,
        envelope: &MessageEnvelope,
        lock_timeout: Duration,
    ) -> Result<(), QueueError> {
        self.lifecycle.guard(QueueOperation::RenewLock)?;

        if let Some(token) = envelope.lock_token() {
            let renewed = self.store.renew(token, lock_timeout);
            debug!(
                queue = self.name(),
                trace_id = envelope.trace_id().unwrap_or_default(),
                message_id = %envelope.message_id(),
                lock_token = %token,
                renewed,
                "Renewed message lock"
            );
        }

        Ok(())
    }

    async fn complete(&self, envelope: &mut MessageEnvelope) -> Result<(), QueueError> {
        self.lifecycle.check_open()?;

        let Some(token) = envelope.lock_token() else {
            return Ok(());
        };
        envelope.clear_lock_token();

        if self.store.release(token).is_some() {
            debug!(
                queue = self.name(),
                trace_id = envelope.trace_id().unwrap_or_default(),
                message_id = %envelope.message_id(),
                lock_token = %token,
                "Completed message"
            );
        }

        Ok(())
    }

    async fn abandon(&self, envelope: &mut MessageEnvelope) -> Result<(), QueueError> {
        self.lifecycle.guard(QueueOperation::Abandon)?;

        let Some(token) = envelope.lock_token() else {
            return Ok(());
        };
        envelope.clear_lock_token();

        match self.store.release(token) {
            Some(locked) if !locked.is_expired() => {
                let mut message = locked.into_message();
                message.stamp_sent_time();
                debug!(
                    queue = self.name(),
                    trace_id = message.trace_id().unwrap_or_default(),
                    message_id = %message.message_id(),
                    lock_token = %token,
                    "Abandoned message"
                );
                self.store.enqueue(message);
            }
            Some(locked) => {
                warn!(
                    queue = self.name(),
                    trace_id = locked.message().trace_id().unwrap_or_default(),
                    message_id = %locked.message().message_id(),
                    lock_token = %token,
                    expired_at = %locked.expiration_time(),
                    "Dropped abandoned message whose lock had expired"
                );
            }
            None => {}
        }

        Ok(())
    }

    async fn move_to_dead_letter(&self, envelope: &mut MessageEnvelope) -> Result<(), QueueError> {
        self.lifecycle.guard(QueueOperation::DeadLetter)?;

        let Some(token) = envelope.lock_token() else {
            return Ok(());
        };
        envelope.clear_lock_token();

        if self.store.release(token).is_some() {
            self.counters.increment_one(&self.counter_names.dead_lettered);
            warn!(
                queue = self.name(),
                trace_id = envelope.trace_id().unwrap_or_default(),
                message_id = %envelope.message_id(),
                lock_token = %token,
                "Moved message to dead letter"
            );
        }

        Ok(())
    }

    async fn listen_until(
        &self,
        trace_id: Option<&str>,
        receiver: Arc<dyn MessageReceiver>,
        cancel: CancellationToken,
    ) -> Result<(), QueueError> {
        self.lifecycle.guard(QueueOperation::Receive)?;

        let shutdown = self.lifecycle.shutdown_token();
        debug!(
            queue = self.name(),
            trace_id = trace_id.unwrap_or_default(),
            "Started listening"
        );

        while !cancel.is_cancelled() && !shutdown.is_cancelled() {
            let checkout = self
                .store
                .checkout(self.listen_interval, self.listen_interval, &cancel);
            let next = tokio::select! {
                next = checkout => next,
                _ = shutdown.cancelled() => None,
            };

            if let Some(envelope) = next {
                self.counters.increment_one(&self.counter_names.received);
                debug!(
                    queue = self.name(),
                    trace_id = envelope.trace_id().unwrap_or_default(),
                    message_id = %envelope.message_id(),
                    lock_token = ?envelope.lock_token(),
                    "Dispatching message to receiver"
                );
                dispatch(self, receiver.as_ref(), envelope).await;
            }
        }

        debug!(
            queue = self.name(),
            trace_id = trace_id.unwrap_or_default(),
            "Stopped listening"
        );
        Ok(())
    }

    fn listen_token(&self) -> CancellationToken {
        self.lifecycle.listen_token()
    }

    fn end_listen(&self, trace_id: Option<&str>) {
        self.lifecycle.end_listen();
        debug!(
            queue = self.name(),
            trace_id = trace_id.unwrap_or_default(),
            "Requested end of listening"
        );
    }

    async fn clear(&self, trace_id: Option<&str>) -> Result<(), QueueError> {
        self.lifecycle.guard(QueueOperation::Clear)?;

        self.store.clear();
        debug!(
            queue = self.name(),
            trace_id = trace_id.unwrap_or_default(),
            "Cleared queue"
        );
        Ok(())
    }
}
