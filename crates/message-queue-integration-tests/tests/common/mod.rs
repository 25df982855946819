//! Common test utilities for message-queue integration tests
//!
//! This module provides:
//! - Tracing setup for test output
//! - Receivers that record deliveries
//! - A loopback broker implementing the cache backend contract

use async_trait::async_trait;
use chrono::Duration;
use message_queue::{
    CacheBackend, MemoryMessageQueue, MessageEnvelope, MessageQueue, MessageReceiver,
    MessageSink, MessagingCapabilities, QueueError, QueueName, ResolvedConnection,
};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Route library logs to the test harness; `RUST_LOG` selects the level
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[allow(dead_code)]
pub fn queue_name(name: &str) -> QueueName {
    QueueName::new(name.to_string()).expect("valid queue name")
}

/// Open in-memory queue with a short listen interval
#[allow(dead_code)]
pub async fn open_memory_queue(name: &str) -> Arc<MemoryMessageQueue> {
    let queue = MemoryMessageQueue::new(queue_name(name))
        .with_listen_interval(Duration::milliseconds(50));
    queue.open(Some("integration")).await.expect("queue opens");
    Arc::new(queue)
}

/// Wait for `count` deliveries, failing the test if they do not arrive
#[allow(dead_code)]
pub async fn collect_types(
    rx: &mut mpsc::UnboundedReceiver<MessageEnvelope>,
    count: usize,
) -> Vec<String> {
    let mut types = Vec::with_capacity(count);
    for _ in 0..count {
        let envelope = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("delivery within timeout")
            .expect("receiver still attached");
        types.push(envelope.message_type().to_string());
    }
    types
}

// ============================================================================
// Receivers
// ============================================================================

/// Receiver that completes every message and reports it on a channel
#[allow(dead_code)]
pub struct CompletingReceiver {
    tx: mpsc::UnboundedSender<MessageEnvelope>,
}

impl CompletingReceiver {
    #[allow(dead_code)]
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<MessageEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl MessageReceiver for CompletingReceiver {
    async fn receive_message(
        &self,
        mut envelope: MessageEnvelope,
        queue: &dyn MessageQueue,
    ) -> anyhow::Result<()> {
        queue.complete(&mut envelope).await?;
        self.tx.send(envelope)?;
        Ok(())
    }
}

// ============================================================================
// Loopback Broker
// ============================================================================

#[derive(Default)]
struct BrokerState {
    sink: Option<MessageSink>,
    /// Published while nobody was subscribed
    pending: Vec<MessageEnvelope>,
    connection: Option<ResolvedConnection>,
    subscriptions: usize,
    unsubscriptions: usize,
    acknowledged: Vec<String>,
}

/// Push-only broker double.
///
/// Published messages are pushed back to the subscriber from a background
/// task, like a network broker would. Messages published without a
/// subscriber wait until one arrives.
#[derive(Default)]
#[allow(dead_code)]
pub struct LoopbackBroker {
    state: Mutex<BrokerState>,
}

#[allow(dead_code)]
impl LoopbackBroker {
    pub fn connection(&self) -> Option<ResolvedConnection> {
        self.state.lock().unwrap().connection.clone()
    }

    pub fn subscriptions(&self) -> usize {
        self.state.lock().unwrap().subscriptions
    }

    pub fn unsubscriptions(&self) -> usize {
        self.state.lock().unwrap().unsubscriptions
    }

    pub fn acknowledged(&self) -> Vec<String> {
        self.state.lock().unwrap().acknowledged.clone()
    }
}

#[async_trait]
impl CacheBackend for LoopbackBroker {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities::all()
    }

    async fn open(
        &self,
        _trace_id: Option<&str>,
        connection: &ResolvedConnection,
    ) -> Result<(), QueueError> {
        self.state.lock().unwrap().connection = Some(connection.clone());
        Ok(())
    }

    async fn close(&self, _trace_id: Option<&str>) -> Result<(), QueueError> {
        self.state.lock().unwrap().connection = None;
        Ok(())
    }

    async fn subscribe(
        &self,
        _trace_id: Option<&str>,
        sink: MessageSink,
    ) -> Result<(), QueueError> {
        let pending = {
            let mut state = self.state.lock().unwrap();
            state.subscriptions += 1;
            state.sink = Some(sink.clone());
            std::mem::take(&mut state.pending)
        };
        for envelope in pending {
            sink.on_message(envelope);
        }
        Ok(())
    }

    async fn unsubscribe(&self, _trace_id: Option<&str>) -> Result<(), QueueError> {
        let mut state = self.state.lock().unwrap();
        state.unsubscriptions += 1;
        state.sink = None;
        Ok(())
    }

    async fn send(
        &self,
        _trace_id: Option<&str>,
        envelope: &MessageEnvelope,
    ) -> Result<(), QueueError> {
        let sink = {
            let mut state = self.state.lock().unwrap();
            match state.sink.clone() {
                Some(sink) => sink,
                None => {
                    state.pending.push(envelope.clone());
                    return Ok(());
                }
            }
        };

        let envelope = envelope.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            sink.on_message(envelope);
        });
        Ok(())
    }

    async fn complete(&self, envelope: &MessageEnvelope) -> Result<(), QueueError> {
        self.state
            .lock()
            .unwrap()
            .acknowledged
            .push(envelope.message_type().to_string());
        Ok(())
    }
}
