//! # Message Queue
//!
//! In-process message queue engine with at-least-once delivery.
//!
//! This library provides:
//! - A queue contract shared by every backend ([`MessageQueue`])
//! - Lock-based checkout with renewal, abandon and dead-lettering
//! - Blocking receive with timeout and push delivery through listen loops
//! - Capability flags enforced before every operation
//! - An in-memory reference queue and a cache adapter for push-only brokers
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Envelopes, identifiers and timestamps
//! - [`capabilities`] - Declared operation support
//! - [`locks`] - Lock bookkeeping for checked-out messages
//! - [`config`] - Queue configuration and loading
//! - [`resolver`] - Connection and credential resolution
//! - [`counters`] - Traffic counters
//! - [`lifecycle`] - Open/close state machine
//! - [`queue`] - Queue and receiver contracts
//! - [`providers`] - Queue implementations
//! - [`factory`] - Named in-memory queues

pub mod capabilities;
pub mod config;
pub mod counters;
pub mod error;
pub mod factory;
pub mod lifecycle;
pub mod locks;
pub mod message;
pub mod providers;
pub mod queue;
pub mod resolver;

mod store;

// Re-export commonly used types at crate root for convenience
pub use capabilities::{MessagingCapabilities, QueueOperation};
pub use config::{ConnectionParams, CredentialParams, QueueConfig, QueueOptions};
pub use counters::{InMemoryCounters, NoOpCounters, QueueCounters};
pub use error::{ConfigurationError, QueueError, SerializationError, ValidationError};
pub use factory::MessageQueueFactory;
pub use lifecycle::{LifecycleState, QueueLifecycle};
pub use locks::LockedMessage;
pub use message::{LockToken, MessageEnvelope, MessageId, QueueName, Timestamp};
pub use providers::{CacheBackend, CachedMessageQueue, MemoryMessageQueue, MessageSink};
pub use queue::{CallbackReceiver, ListenHandle, MessageQueue, MessageQueueExt, MessageReceiver};
pub use resolver::{
    ConfigConnectionResolver, ConnectionResolver, CredentialResolver, ResolvedConnection,
};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
