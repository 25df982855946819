//! Queue and receiver contracts.
//!
//! [`MessageQueue`] is the operation surface shared by every queue variant.
//! Consumers either pull with [`MessageQueue::receive`] or attach a
//! [`MessageReceiver`] with [`MessageQueue::listen`]. Callback sugar, typed
//! sends and background listening live on [`MessageQueueExt`], which is
//! implemented for every queue.
//!
//! # Examples
//!
//! ```rust,no_run
//! use futures::FutureExt;
//! use message_queue::{MemoryMessageQueue, MessageQueue, MessageQueueExt, QueueName};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), message_queue::QueueError> {
//! let queue = Arc::new(MemoryMessageQueue::new(QueueName::new("orders".to_string())?));
//! queue.open(None).await?;
//!
//! let handle = queue.clone().begin_listen_fn(None, |mut envelope, queue| {
//!     async move {
//!         println!("received {}", envelope);
//!         queue.complete(&mut envelope).await?;
//!         Ok(())
//!     }
//!     .boxed()
//! });
//!
//! queue.send_as_object(Some("trace-1"), "order.created", &serde_json::json!({"id": 7})).await?;
//!
//! queue.end_listen(None);
//! handle.join().await?;
//! # Ok(())
//! # }
//! ```

use crate::capabilities::MessagingCapabilities;
use crate::error::QueueError;
use crate::message::MessageEnvelope;
use async_trait::async_trait;
use chrono::Duration;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;

// ============================================================================
// Queue Contract
// ============================================================================

/// Operations every queue variant exposes
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Stable queue name
    fn name(&self) -> &str;

    /// Operations this instance supports
    fn capabilities(&self) -> &MessagingCapabilities;

    fn is_open(&self) -> bool;

    /// Open the queue; opening an open queue does nothing
    async fn open(&self, trace_id: Option<&str>) -> Result<(), QueueError>;

    /// Close the queue, stopping listeners and releasing waiting receivers
    async fn close(&self, trace_id: Option<&str>) -> Result<(), QueueError>;

    /// Number of available messages; checked-out messages are not counted
    async fn read_message_count(&self) -> Result<usize, QueueError>;

    /// Enqueue a message
    async fn send(
        &self,
        trace_id: Option<&str>,
        envelope: MessageEnvelope,
    ) -> Result<(), QueueError>;

    /// Copy of the head message without checking it out
    async fn peek(&self, trace_id: Option<&str>) -> Result<Option<MessageEnvelope>, QueueError>;

    /// Copies of up to `count` messages from the head, oldest first
    async fn peek_batch(
        &self,
        trace_id: Option<&str>,
        count: usize,
    ) -> Result<Vec<MessageEnvelope>, QueueError>;

    /// Check out the head message, waiting up to `wait_timeout` for one.
    ///
    /// The lock lasts `wait_timeout` as well. `Ok(None)` means nothing
    /// arrived in time.
    async fn receive(
        &self,
        trace_id: Option<&str>,
        wait_timeout: Duration,
    ) -> Result<Option<MessageEnvelope>, QueueError>;

    /// Reset the lock to expire `lock_timeout` from now.
    ///
    /// Silently does nothing when the lock is unknown or already expired.
    async fn renew_lock(
        &self,
        envelope: &MessageEnvelope,
        lock_timeout: Duration,
    ) -> Result<(), QueueError>;

    /// Remove a checked-out message permanently
    async fn complete(&self, envelope: &mut MessageEnvelope) -> Result<(), QueueError>;

    /// Return a checked-out message to the tail, unless its lock has expired
    async fn abandon(&self, envelope: &mut MessageEnvelope) -> Result<(), QueueError>;

    /// Remove a checked-out message permanently as a failure
    async fn move_to_dead_letter(&self, envelope: &mut MessageEnvelope) -> Result<(), QueueError>;

    /// Deliver messages to `receiver` until `cancel` fires or the queue closes
    async fn listen_until(
        &self,
        trace_id: Option<&str>,
        receiver: Arc<dyn MessageReceiver>,
        cancel: CancellationToken,
    ) -> Result<(), QueueError>;

    /// Token that the next [`end_listen`](Self::end_listen) cancels
    fn listen_token(&self) -> CancellationToken;

    /// Deliver messages to `receiver` until [`end_listen`](Self::end_listen)
    /// or close
    async fn listen(
        &self,
        trace_id: Option<&str>,
        receiver: Arc<dyn MessageReceiver>,
    ) -> Result<(), QueueError> {
        let cancel = self.listen_token();
        self.listen_until(trace_id, receiver, cancel).await
    }

    /// Stop the active listen loop after its current delivery
    fn end_listen(&self, trace_id: Option<&str>);

    /// Drop every available and checked-out message
    async fn clear(&self, trace_id: Option<&str>) -> Result<(), QueueError>;
}

// ============================================================================
// Receivers
// ============================================================================

/// Consumer side of [`MessageQueue::listen`].
///
/// The receiver owns disposition: it should complete, abandon or dead-letter
/// each envelope through `queue`. Errors are logged by the listen loop and
/// never stop it.
#[async_trait]
pub trait MessageReceiver: Send + Sync {
    async fn receive_message(
        &self,
        envelope: MessageEnvelope,
        queue: &dyn MessageQueue,
    ) -> anyhow::Result<()>;
}

/// Receiver adapter around a callback
pub struct CallbackReceiver<F> {
    callback: F,
}

impl<F> CallbackReceiver<F>
where
    F: for<'a> Fn(MessageEnvelope, &'a dyn MessageQueue) -> BoxFuture<'a, anyhow::Result<()>>
        + Send
        + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> fmt::Debug for CallbackReceiver<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackReceiver").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> MessageReceiver for CallbackReceiver<F>
where
    F: for<'a> Fn(MessageEnvelope, &'a dyn MessageQueue) -> BoxFuture<'a, anyhow::Result<()>>
        + Send
        + Sync,
{
    async fn receive_message(
        &self,
        envelope: MessageEnvelope,
        queue: &dyn MessageQueue,
    ) -> anyhow::Result<()> {
        (self.callback)(envelope, queue).await
    }
}

/// Hand one envelope to a receiver, logging failures and panics.
///
/// The envelope stays locked whatever the outcome.
pub(crate) async fn dispatch(
    queue: &dyn MessageQueue,
    receiver: &dyn MessageReceiver,
    envelope: MessageEnvelope,
) {
    let message_id = envelope.message_id().clone();
    let trace_id = envelope.trace_id().unwrap_or_default().to_string();
    let lock_token = envelope.lock_token().map(|t| t.value());

    let outcome = AssertUnwindSafe(receiver.receive_message(envelope, queue))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(
            queue = queue.name(),
            message_id = %message_id,
            trace_id = %trace_id,
            lock_token = ?lock_token,
            error = %err,
            "Receiver failed to process message"
        ),
        Err(panic) => error!(
            queue = queue.name(),
            message_id = %message_id,
            trace_id = %trace_id,
            lock_token = ?lock_token,
            panic = panic_message(panic.as_ref()),
            "Receiver panicked while processing message"
        ),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

// ============================================================================
// Extensions
// ============================================================================

/// Convenience operations available on every queue
#[async_trait]
pub trait MessageQueueExt: MessageQueue {
    /// Serialize `value` as JSON and send it with the given type tag
    async fn send_as_object<T>(
        &self,
        trace_id: Option<&str>,
        message_type: &str,
        value: &T,
    ) -> Result<(), QueueError>
    where
        T: Serialize + Sync + ?Sized;

    /// [`listen`](MessageQueue::listen) with a callback instead of a receiver
    async fn listen_fn<F>(&self, trace_id: Option<&str>, callback: F) -> Result<(), QueueError>
    where
        F: for<'a> Fn(MessageEnvelope, &'a dyn MessageQueue) -> BoxFuture<'a, anyhow::Result<()>>
            + Send
            + Sync
            + 'static;

    /// Run [`listen`](MessageQueue::listen) on a background task.
    ///
    /// The listen token is captured before this returns, so an
    /// [`end_listen`](MessageQueue::end_listen) issued right after still
    /// stops the task. [`ListenHandle::cancel`] stops this task alone.
    fn begin_listen(
        self: Arc<Self>,
        trace_id: Option<&str>,
        receiver: Arc<dyn MessageReceiver>,
    ) -> ListenHandle
    where
        Self: 'static;

    /// [`begin_listen`](Self::begin_listen) with a callback
    fn begin_listen_fn<F>(self: Arc<Self>, trace_id: Option<&str>, callback: F) -> ListenHandle
    where
        Self: 'static,
        F: for<'a> Fn(MessageEnvelope, &'a dyn MessageQueue) -> BoxFuture<'a, anyhow::Result<()>>
            + Send
            + Sync
            + 'static;
}

#[async_trait]
impl<Q> MessageQueueExt for Q
where
    Q: MessageQueue + ?Sized,
{
    async fn send_as_object<T>(
        &self,
        trace_id: Option<&str>,
        message_type: &str,
        value: &T,
    ) -> Result<(), QueueError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let envelope = MessageEnvelope::from_object(trace_id, message_type, value)?;
        self.send(trace_id, envelope).await
    }

    async fn listen_fn<F>(&self, trace_id: Option<&str>, callback: F) -> Result<(), QueueError>
    where
        F: for<'a> Fn(MessageEnvelope, &'a dyn MessageQueue) -> BoxFuture<'a, anyhow::Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.listen(trace_id, Arc::new(CallbackReceiver::new(callback)))
            .await
    }

    fn begin_listen(
        self: Arc<Self>,
        trace_id: Option<&str>,
        receiver: Arc<dyn MessageReceiver>,
    ) -> ListenHandle
    where
        Self: 'static,
    {
        let cancel = self.listen_token().child_token();
        let queue = self.name().to_string();
        let trace_id = trace_id.map(str::to_string);
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            self.listen_until(trace_id.as_deref(), receiver, task_cancel)
                .await
        });

        ListenHandle {
            queue,
            cancel,
            task,
        }
    }

    fn begin_listen_fn<F>(self: Arc<Self>, trace_id: Option<&str>, callback: F) -> ListenHandle
    where
        Self: 'static,
        F: for<'a> Fn(MessageEnvelope, &'a dyn MessageQueue) -> BoxFuture<'a, anyhow::Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.begin_listen(trace_id, Arc::new(CallbackReceiver::new(callback)))
    }
}

// ============================================================================
// Listen Handle
// ============================================================================

/// Handle to a listen loop running on a background task
#[derive(Debug)]
pub struct ListenHandle {
    queue: String,
    cancel: CancellationToken,
    task: JoinHandle<Result<(), QueueError>>,
}

impl ListenHandle {
    /// Name of the queue being listened to
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop this listener after its current delivery
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the listen loop to finish
    pub async fn join(self) -> Result<(), QueueError> {
        let Self { queue, task, .. } = self;
        match task.await {
            Ok(result) => result,
            Err(err) => Err(QueueError::backend(
                &queue,
                format!("listen task failed: {}", err),
            )),
        }
    }

    /// Cancel and wait for the loop to finish
    pub async fn stop(self) -> Result<(), QueueError> {
        self.cancel();
        self.join().await
    }
}
