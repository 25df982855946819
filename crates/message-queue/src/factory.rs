//! Factory for in-memory queues.
//!
//! Producers and consumers in one process must share a queue instance to
//! exchange messages. [`MessageQueueFactory`] hands out one
//! [`MemoryMessageQueue`] per name and returns the same instance on every
//! later request for that name.

use crate::config::QueueConfig;
use crate::counters::{NoOpCounters, QueueCounters};
use crate::error::QueueError;
use crate::message::QueueName;
use crate::providers::MemoryMessageQueue;
use crate::queue::MessageQueue;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[cfg(test)]
#[path = "factory_tests.rs"]
mod tests;

/// Creates and caches in-memory queues by name
pub struct MessageQueueFactory {
    queues: Mutex<HashMap<QueueName, Arc<MemoryMessageQueue>>>,
    counters: Arc<dyn QueueCounters>,
}

impl MessageQueueFactory {
    pub fn new() -> Self {
        Self::with_counters(Arc::new(NoOpCounters))
    }

    /// Factory whose queues report to `counters`
    pub fn with_counters(counters: Arc<dyn QueueCounters>) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            counters,
        }
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<QueueName, Arc<MemoryMessageQueue>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue with the given name, created closed on first request
    pub fn create_queue(&self, name: &QueueName) -> Arc<dyn MessageQueue> {
        self.get_or_create(name.clone(), || {
            MemoryMessageQueue::new(name.clone()).with_counters(Arc::clone(&self.counters))
        })
    }

    /// Queue described by configuration.
    ///
    /// Options only apply when the queue is first created. A configuration
    /// without a name always yields a new queue under a generated name.
    pub fn create_from_config(
        &self,
        config: &QueueConfig,
    ) -> Result<Arc<dyn MessageQueue>, QueueError> {
        let name = config.queue_name()?;
        let listen_interval = config.options.listen_interval();
        Ok(self.get_or_create(name.clone(), || {
            MemoryMessageQueue::new(name.clone())
                .with_counters(Arc::clone(&self.counters))
                .with_listen_interval(listen_interval)
        }))
    }

    /// Previously created queue, if any
    pub fn get(&self, name: &QueueName) -> Option<Arc<dyn MessageQueue>> {
        self.queues()
            .get(name)
            .map(|queue| Arc::clone(queue) as Arc<dyn MessageQueue>)
    }

    /// Names of all created queues, sorted
    pub fn queue_names(&self) -> Vec<QueueName> {
        let mut names: Vec<QueueName> = self.queues().keys().cloned().collect();
        names.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        names
    }

    /// Fresh, unshared queue with a generated name
    pub fn create_test_queue() -> Arc<dyn MessageQueue> {
        Arc::new(MemoryMessageQueue::default())
    }

    fn get_or_create(
        &self,
        name: QueueName,
        create: impl FnOnce() -> MemoryMessageQueue,
    ) -> Arc<dyn MessageQueue> {
        let mut queues = self.queues();
        let queue = queues.entry(name).or_insert_with(|| {
            let queue = Arc::new(create());
            debug!(queue = queue.name(), "Created queue");
            queue
        });
        Arc::clone(queue) as Arc<dyn MessageQueue>
    }
}

impl Default for MessageQueueFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MessageQueueFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageQueueFactory")
            .field("queues", &self.queue_names())
            .finish_non_exhaustive()
    }
}
