//! Observational counters for queue traffic.
//!
//! Queues report sent, received and dead-lettered messages through the
//! [`QueueCounters`] trait. Counting is best-effort and never affects
//! delivery; the default [`NoOpCounters`] discards everything.
//!
//! # Examples
//!
//! ```rust
//! use message_queue::counters::{InMemoryCounters, QueueCounters};
//!
//! let counters = InMemoryCounters::default();
//! counters.increment_one("queue.orders.sent_messages");
//! counters.increment_one("queue.orders.sent_messages");
//!
//! assert_eq!(counters.get("queue.orders.sent_messages"), 2);
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

#[cfg(test)]
#[path = "counters_tests.rs"]
mod tests;

/// Sink for named counters.
///
/// All methods take `&self` so one collector can be shared as
/// `Arc<dyn QueueCounters>` between queues and tasks.
pub trait QueueCounters: Send + Sync {
    /// Increment the named counter by one
    fn increment_one(&self, name: &str);
}

/// Counters that record nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpCounters;

impl QueueCounters for NoOpCounters {
    fn increment_one(&self, _name: &str) {
        // No-op
    }
}

/// Counters kept in process memory, useful for diagnostics and tests
#[derive(Debug, Default)]
pub struct InMemoryCounters {
    values: Mutex<HashMap<String, u64>>,
}

impl InMemoryCounters {
    /// Current value of a counter, zero when never incremented
    pub fn get(&self, name: &str) -> u64 {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.get(name).copied().unwrap_or(0)
    }

    /// Copy of every counter
    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl QueueCounters for InMemoryCounters {
    fn increment_one(&self, name: &str) {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        *values.entry(name.to_string()).or_insert(0) += 1;
    }
}

/// Counter names used by one queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueCounterNames {
    pub sent: String,
    pub received: String,
    pub dead_lettered: String,
}

impl QueueCounterNames {
    pub fn for_queue(queue: &str) -> Self {
        Self {
            sent: format!("queue.{}.sent_messages", queue),
            received: format!("queue.{}.received_messages", queue),
            dead_lettered: format!("queue.{}.dead_messages", queue),
        }
    }
}
