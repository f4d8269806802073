//! Event store trait — the core abstraction for event backends
//!
//! Every backend (Redis keyspace notifications, NATS JetStream, in-memory)
//! implements `EventStore`. Publishers and subscribers only ever talk to
//! this trait; anything backend specific, such as rebuilding "last value
//! per key" out of a log, lives inside the implementation.

use crate::error::Result;
use crate::pattern::KeyPattern;
use crate::types::{Event, EventKey};
use async_trait::async_trait;

pub mod jetstream;
pub mod memory;
pub mod redis;

/// Core trait for event backends
///
/// One instance is one connection to the backend. It may be shared by
/// any number of publishers and subscribers.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Make `event` the current value for its key and notify live feeds
    async fn publish(&self, event: &Event) -> Result<()>;

    /// Current value for `key`, or [`Event::invalid_for`] if it was never published
    async fn get(&self, key: &EventKey) -> Result<Event>;

    /// Current values for several keys, in the order given
    async fn get_many(&self, keys: &[EventKey]) -> Result<Vec<Event>> {
        let mut events = Vec::with_capacity(keys.len());
        for key in keys {
            events.push(self.get(key).await?);
        }
        Ok(events)
    }

    /// Open a live feed for exact keys
    ///
    /// Returns once the backend is listening: anything published after
    /// this call returns is delivered to the feed.
    async fn subscribe(&self, keys: &[EventKey]) -> Result<Box<dyn EventFeed>>;

    /// Open a live feed for every key matching `pattern`
    async fn psubscribe(&self, pattern: &KeyPattern) -> Result<Box<dyn EventFeed>>;

    /// Close the connection; later publishes fail with `EventError::Closed`
    async fn shutdown(&self) -> Result<()>;

    /// Health check — true if the connection is usable
    async fn health(&self) -> Result<bool>;

    /// Store name (e.g., "redis", "jetstream", "memory")
    fn name(&self) -> &str;
}

/// Live updates from a backend
#[async_trait]
pub trait EventFeed: Send {
    /// Next event, `Ok(None)` once the backend has closed the feed
    ///
    /// A payload that fails to decode is reported as an error; the feed
    /// stays usable afterwards.
    async fn next(&mut self) -> Result<Option<Event>>;

    /// Release backend resources (pub/sub connection, consumer)
    async fn close(&mut self) -> Result<()>;
}

pub use self::jetstream::{JetStreamConfig, JetStreamStore};
pub use self::memory::{MemoryBroker, MemoryConfig, MemoryStore};
pub use self::redis::{RedisConfig, RedisStore};
