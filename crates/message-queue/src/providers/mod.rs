//! Queue implementations.
//!
//! [`MemoryMessageQueue`] keeps everything in process memory.
//! [`CachedMessageQueue`] fronts a push-only broker described by a
//! [`CacheBackend`], buffering pushed messages so the full queue contract
//! holds.

pub mod cached;
pub mod memory;

pub use cached::{CacheBackend, CachedMessageQueue, MessageSink};
pub use memory::MemoryMessageQueue;
