//! Cache adapter for push-only brokers.
//!
//! Some brokers only push messages to a subscription and cannot peek. A
//! [`CacheBackend`] wraps such a broker; [`CachedMessageQueue`] subscribes to
//! it, buffers every pushed message locally and serves peek, receive and the
//! lock operations from that buffer.
//!
//! The backend pushes messages into the queue through the [`MessageSink`]
//! handed to [`CacheBackend::subscribe`]. While nobody listens, pushed
//! messages are buffered and wake blocked receivers. Once a receiver is
//! attached with `listen`, the buffered backlog is flushed to it in arrival
//! order and later messages are forwarded straight to it. Messages still in
//! flight when listening stops go back to the buffer.

use crate::capabilities::{MessagingCapabilities, QueueOperation};
use crate::config::QueueConfig;
use crate::counters::{NoOpCounters, QueueCounterNames, QueueCounters};
use crate::error::QueueError;
use crate::lifecycle::{LifecycleState, QueueLifecycle};
use crate::message::{LockToken, MessageEnvelope, QueueName};
use crate::queue::{dispatch, MessageQueue, MessageReceiver};
use crate::resolver::{
    ConfigConnectionResolver, ConnectionResolver, CredentialResolver, ResolvedConnection,
};
use crate::store::MessageStore;
use async_trait::async_trait;
use chrono::Duration;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[cfg(test)]
#[path = "cached_tests.rs"]
mod tests;

// ============================================================================
// Backend Contract
// ============================================================================

/// Hooks a push-only broker supplies to [`CachedMessageQueue`]
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Operations the broker supports natively.
    ///
    /// Counting, peeking, receiving, lock renewal and abandon are always
    /// provided by the local buffer whatever this returns.
    fn capabilities(&self) -> MessagingCapabilities;

    /// Connect using the resolved endpoints and credential
    async fn open(
        &self,
        trace_id: Option<&str>,
        connection: &ResolvedConnection,
    ) -> Result<(), QueueError>;

    async fn close(&self, trace_id: Option<&str>) -> Result<(), QueueError>;

    /// Start pushing messages into `sink`
    async fn subscribe(&self, trace_id: Option<&str>, sink: MessageSink)
        -> Result<(), QueueError>;

    /// Stop pushing messages; called on close even when never subscribed
    async fn unsubscribe(&self, trace_id: Option<&str>) -> Result<(), QueueError>;

    /// Publish a message to the broker
    async fn send(
        &self,
        trace_id: Option<&str>,
        envelope: &MessageEnvelope,
    ) -> Result<(), QueueError>;

    /// Acknowledge a completed message
    async fn complete(&self, _envelope: &MessageEnvelope) -> Result<(), QueueError> {
        Ok(())
    }

    /// Report a dead-lettered message
    async fn move_to_dead_letter(&self, _envelope: &MessageEnvelope) -> Result<(), QueueError> {
        Ok(())
    }

    /// Purge broker-side messages
    async fn clear(&self, _trace_id: Option<&str>) -> Result<(), QueueError> {
        Ok(())
    }
}

fn effective_capabilities(backend: MessagingCapabilities) -> MessagingCapabilities {
    MessagingCapabilities {
        can_message_count: true,
        can_receive: true,
        can_peek: true,
        can_peek_batch: true,
        can_renew_lock: true,
        can_abandon: true,
        ..backend
    }
}

// ============================================================================
// Shared Buffer
// ============================================================================

struct Forwarder {
    listener: u64,
    tx: mpsc::UnboundedSender<MessageEnvelope>,
}

/// Buffer and forwarding target shared between the queue and its sinks.
///
/// Lock order: `forward` before the store's own lock.
struct CacheShared {
    queue: String,
    store: MessageStore,
    forward: Mutex<Option<Forwarder>>,
}

impl CacheShared {
    fn forward(&self) -> MutexGuard<'_, Option<Forwarder>> {
        self.forward.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forward to the attached listener, or buffer when there is none
    fn accept(&self, envelope: MessageEnvelope) {
        let forward = self.forward();
        self.route(&forward, envelope);
    }

    fn route(&self, forward: &Option<Forwarder>, envelope: MessageEnvelope) {
        let envelope = match forward {
            Some(forwarder) => match forwarder.tx.send(envelope) {
                Ok(()) => return,
                Err(mpsc::error::SendError(envelope)) => envelope,
            },
            None => envelope,
        };
        self.store.enqueue(envelope);
    }

    /// Switch to forwarding mode for `listener` and take the buffered backlog
    fn attach(
        &self,
        listener: u64,
        tx: mpsc::UnboundedSender<MessageEnvelope>,
    ) -> Vec<MessageEnvelope> {
        let mut forward = self.forward();
        *forward = Some(Forwarder { listener, tx });
        self.store.drain_available()
    }

    /// Leave forwarding mode and hand undelivered messages back.
    ///
    /// When another listener has taken over, the messages are forwarded to it
    /// instead. With `discard` set they are dropped.
    fn detach(
        &self,
        listener: u64,
        rx: &mut mpsc::UnboundedReceiver<MessageEnvelope>,
        mut undelivered: VecDeque<MessageEnvelope>,
        discard: bool,
    ) -> usize {
        let mut forward = self.forward();
        if forward.as_ref().map(|f| f.listener) == Some(listener) {
            *forward = None;
        }

        rx.close();
        while let Ok(envelope) = rx.try_recv() {
            undelivered.push_back(envelope);
        }

        let count = undelivered.len();
        if !discard {
            for envelope in undelivered {
                self.route(&forward, envelope);
            }
        }
        count
    }
}

/// Entry point through which a backend pushes messages into its queue
#[derive(Clone)]
pub struct MessageSink {
    shared: Arc<CacheShared>,
}

impl MessageSink {
    /// Deliver one pushed message.
    ///
    /// Stamps `sent_time` when the broker did not.
    pub fn on_message(&self, mut envelope: MessageEnvelope) {
        envelope.clear_lock_token();
        if envelope.sent_time().is_none() {
            envelope.stamp_sent_time();
        }
        debug!(
            queue = %self.shared.queue,
            trace_id = envelope.trace_id().unwrap_or_default(),
            message_id = %envelope.message_id(),
            "Received pushed message"
        );
        self.shared.accept(envelope);
    }

    /// Name of the queue this sink feeds
    pub fn queue(&self) -> &str {
        &self.shared.queue
    }
}

impl fmt::Debug for MessageSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageSink")
            .field("queue", &self.shared.queue)
            .finish()
    }
}

// ============================================================================
// Cached Queue
// ============================================================================

/// Queue fronting a push-only broker
pub struct CachedMessageQueue<B> {
    lifecycle: QueueLifecycle,
    backend: B,
    shared: Arc<CacheShared>,
    subscribed: tokio::sync::Mutex<bool>,
    autosubscribe: bool,
    listen_interval: Duration,
    counters: Arc<dyn QueueCounters>,
    counter_names: QueueCounterNames,
    next_listener: AtomicU64,
}

impl<B: CacheBackend> CachedMessageQueue<B> {
    /// Create a closed queue over `backend`.
    ///
    /// Without a connection resolver the queue cannot open; see
    /// [`with_connection_resolver`](Self::with_connection_resolver).
    pub fn new(name: QueueName, backend: B) -> Self {
        let capabilities = effective_capabilities(backend.capabilities());
        let counter_names = QueueCounterNames::for_queue(name.as_str());
        let shared = Arc::new(CacheShared {
            queue: name.to_string(),
            store: MessageStore::new(),
            forward: Mutex::new(None),
        });

        Self {
            lifecycle: QueueLifecycle::new(name, capabilities),
            backend,
            shared,
            subscribed: tokio::sync::Mutex::new(false),
            autosubscribe: false,
            listen_interval: QueueConfig::default().options.listen_interval(),
            counters: Arc::new(NoOpCounters),
            counter_names,
            next_listener: AtomicU64::new(0),
        }
    }

    /// Create a queue whose name, options, endpoints and credential come from
    /// configuration
    pub fn from_config(config: &QueueConfig, backend: B) -> Result<Self, QueueError> {
        let resolver = Arc::new(ConfigConnectionResolver::from_config(config));
        Ok(Self::new(config.queue_name()?, backend)
            .with_autosubscribe(config.options.autosubscribe)
            .with_listen_interval(config.options.listen_interval())
            .with_connection_resolver(resolver.clone())
            .with_credential_resolver(resolver))
    }

    pub fn with_connection_resolver(mut self, resolver: Arc<dyn ConnectionResolver>) -> Self {
        self.lifecycle = self.lifecycle.with_connection_resolver(resolver);
        self
    }

    pub fn with_credential_resolver(mut self, resolver: Arc<dyn CredentialResolver>) -> Self {
        self.lifecycle = self.lifecycle.with_credential_resolver(resolver);
        self
    }

    /// Subscribe while opening instead of on first use
    pub fn with_autosubscribe(mut self, autosubscribe: bool) -> Self {
        self.autosubscribe = autosubscribe;
        self
    }

    /// Re-check interval of the listen loop, also the lock timeout of dispatched messages
    pub fn with_listen_interval(mut self, listen_interval: Duration) -> Self {
        self.listen_interval = listen_interval;
        self
    }

    pub fn with_counters(mut self, counters: Arc<dyn QueueCounters>) -> Self {
        self.counters = counters;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub async fn is_subscribed(&self) -> bool {
        *self.subscribed.lock().await
    }

    /// Sink feeding this queue's buffer
    pub fn sink(&self) -> MessageSink {
        MessageSink {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Number of checked-out messages, expired or not
    pub fn locked_message_count(&self) -> usize {
        self.shared.store.locked_len()
    }

    /// Tokens of checked-out messages whose lock has run out
    pub fn expired_locks(&self) -> Vec<LockToken> {
        self.shared.store.expired_tokens()
    }

    async fn ensure_subscribed(&self, trace_id: Option<&str>) -> Result<(), QueueError> {
        let mut subscribed = self.subscribed.lock().await;
        if !*subscribed {
            self.backend.subscribe(trace_id, self.sink()).await?;
            *subscribed = true;
            debug!(
                queue = self.name(),
                trace_id = trace_id.unwrap_or_default(),
                "Subscribed to backend"
            );
        }
        Ok(())
    }

    async fn open_backend(&self, trace_id: Option<&str>) -> Result<(), QueueError> {
        let connection = self.lifecycle.resolve_connection(trace_id).await?;
        self.backend.open(trace_id, &connection).await?;
        if self.autosubscribe {
            self.ensure_subscribed(trace_id).await?;
        }
        Ok(())
    }

    /// Unsubscribe unconditionally, then close the backend.
    ///
    /// Both steps always run; the first error is returned.
    async fn release_backend(&self, trace_id: Option<&str>) -> Result<(), QueueError> {
        let unsubscribed = {
            let mut subscribed = self.subscribed.lock().await;
            let result = self.backend.unsubscribe(trace_id).await;
            *subscribed = false;
            result
        };
        if let Err(err) = &unsubscribed {
            warn!(
                queue = self.name(),
                trace_id = trace_id.unwrap_or_default(),
                error = %err,
                "Failed to unsubscribe from backend"
            );
        }

        let closed = self.backend.close(trace_id).await;
        if let Err(err) = &closed {
            warn!(
                queue = self.name(),
                trace_id = trace_id.unwrap_or_default(),
                error = %err,
                "Failed to close backend"
            );
        }

        unsubscribed.and(closed)
    }
}

impl<B> fmt::Debug for CachedMessageQueue<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedMessageQueue")
            .field("lifecycle", &self.lifecycle)
            .field("autosubscribe", &self.autosubscribe)
            .field("available", &self.shared.store.available_len())
            .field("locked", &self.shared.store.locked_len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<B: CacheBackend> MessageQueue for CachedMessageQueue<B> {
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
        if !self.lifecycle.begin_open()? {
            return Ok(());
        }

        match self.open_backend(trace_id).await {
            Ok(()) => {
                self.lifecycle.complete_open(trace_id);
                Ok(())
            }
            Err(err) => {
                // Leave no subscription or connection behind; the open error wins.
                let _ = self.release_backend(trace_id).await;
                self.shared.store.clear();
                self.lifecycle.abort_open();
                error!(
                    queue = self.name(),
                    trace_id = trace_id.unwrap_or_default(),
                    error = %err,
                    "Failed to open queue"
                );
                Err(err)
            }
        }
    }

    async fn close(&self, trace_id: Option<&str>) -> Result<(), QueueError> {
        if !self.lifecycle.begin_close()? {
            return Ok(());
        }

        let released = self.release_backend(trace_id).await;
        self.shared.store.clear();
        self.lifecycle.complete_close(trace_id);
        released
    }

    async fn read_message_count(&self) -> Result<usize, QueueError> {
        self.lifecycle.guard(QueueOperation::MessageCount)?;
        self.ensure_subscribed(None).await?;
        Ok(self.shared.store.available_len())
    }

    async fn send(
        &self,
        trace_id: Option<&str>,
        mut envelope: MessageEnvelope,
    ) -> Result<(), QueueError> {
        self.lifecycle.guard(QueueOperation::Send)?;

        envelope.stamp_sent_time();
        self.backend.send(trace_id, &envelope).await?;
        self.counters.increment_one(&self.counter_names.sent);
        debug!(
            queue = self.name(),
            trace_id = trace_id.unwrap_or_default(),
            message_id = %envelope.message_id(),
            message_type = envelope.message_type(),
            "Sent message to backend"
        );

        Ok(())
    }

    async fn peek(&self, trace_id: Option<&str>) -> Result<Option<MessageEnvelope>, QueueError> {
        self.lifecycle.guard(QueueOperation::Peek)?;
        self.ensure_subscribed(trace_id).await?;
        Ok(self.shared.store.peek())
    }

    async fn peek_batch(
        &self,
        trace_id: Option<&str>,
        count: usize,
    ) -> Result<Vec<MessageEnvelope>, QueueError> {
        self.lifecycle.guard(QueueOperation::PeekBatch)?;
        self.ensure_subscribed(trace_id).await?;
        Ok(self.shared.store.peek_batch(count))
    }

    async fn receive(
        &self,
        trace_id: Option<&str>,
        wait_timeout: Duration,
    ) -> Result<Option<MessageEnvelope>, QueueError> {
        self.lifecycle.guard(QueueOperation::Receive)?;
        self.ensure_subscribed(trace_id).await?;

        let shutdown = self.lifecycle.shutdown_token();
        let received = self
            .shared
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
            let renewed = self.shared.store.renew(token, lock_timeout);
            debug!(
                queue = self.name(),
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

        if self.shared.store.release(token).is_some() {
            self.backend.complete(envelope).await?;
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

        match self.shared.store.release(token) {
            Some(locked) if !locked.is_expired() => {
                let mut message = locked.into_message();
                message.stamp_sent_time();
                debug!(
                    queue = self.name(),
                    message_id = %message.message_id(),
                    lock_token = %token,
                    "Abandoned message"
                );
                self.shared.accept(message);
            }
            Some(locked) => {
                warn!(
                    queue = self.name(),
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

        if self.shared.store.release(token).is_some() {
            self.backend.move_to_dead_letter(envelope).await?;
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
        self.ensure_subscribed(trace_id).await?;

        let shutdown = self.lifecycle.shutdown_token();
        let listener = self.next_listener.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut backlog = VecDeque::from(self.shared.attach(listener, tx));
        debug!(
            queue = self.name(),
            trace_id = trace_id.unwrap_or_default(),
            backlog = backlog.len(),
            "Started listening"
        );

        while !cancel.is_cancelled() && !shutdown.is_cancelled() {
            let envelope = match backlog.pop_front() {
                Some(envelope) => envelope,
                None => tokio::select! {
                    next = rx.recv() => match next {
                        Some(envelope) => envelope,
                        // Another listener took over forwarding.
                        None => break,
                    },
                    _ = cancel.cancelled() => break,
                    _ = shutdown.cancelled() => break,
                },
            };

            let envelope = self.shared.store.lock(envelope, self.listen_interval);
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

        let returned = self
            .shared
            .detach(listener, &mut rx, backlog, shutdown.is_cancelled());
        debug!(
            queue = self.name(),
            trace_id = trace_id.unwrap_or_default(),
            returned,
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

        self.shared.store.clear();
        self.backend.clear(trace_id).await?;
        debug!(
            queue = self.name(),
            trace_id = trace_id.unwrap_or_default(),
            "Cleared queue"
        );
        Ok(())
    }
}
