//! NATS JetStream event store
//!
//! Log/topic model: every key is a subject under the configured prefix,
//! and the stream keeps the last message per subject. The "current value"
//! of a key is the most recent message on its subject.

mod client;
mod config;
mod feed;

pub use client::{JetStreamClient, StreamInfo};
pub use config::{JetStreamConfig, StorageType};
pub use feed::JetStreamFeed;

use crate::error::{EventError, Result};
use crate::pattern::KeyPattern;
use crate::store::{EventFeed, EventStore};
use crate::types::{Event, EventKey};
use async_trait::async_trait;

/// NATS JetStream event store
///
/// Wraps `JetStreamClient` and implements the `EventStore` trait.
pub struct JetStreamStore {
    client: JetStreamClient,
}

impl JetStreamStore {
    /// Connect to NATS and initialize the event stream
    pub async fn connect(config: JetStreamConfig) -> Result<Self> {
        let client = JetStreamClient::connect(config).await?;
        Ok(Self { client })
    }

    /// Get the underlying client for stream inspection
    pub fn client(&self) -> &JetStreamClient {
        &self.client
    }
}

#[async_trait]
impl EventStore for JetStreamStore {
    async fn publish(&self, event: &Event) -> Result<()> {
        self.client.publish(event).await.map(|_| ())
    }

    async fn get(&self, key: &EventKey) -> Result<Event> {
        self.client.last_value(key).await
    }

    async fn subscribe(&self, keys: &[EventKey]) -> Result<Box<dyn EventFeed>> {
        if keys.is_empty() {
            // An unfiltered consumer would see the whole stream
            return Err(EventError::SubscriptionSetup {
                target: String::new(),
                reason: "no keys to subscribe to".to_string(),
            });
        }
        let config = self.client.config();
        let subjects = keys.iter().map(|k| config.subject_for(k)).collect();
        let feed = self.client.subscribe(subjects, None).await?;
        Ok(Box::new(feed))
    }

    async fn psubscribe(&self, pattern: &KeyPattern) -> Result<Box<dyn EventFeed>> {
        let config = self.client.config();
        let subtree = match pattern.subsystem() {
            Some(subsystem) => format!("{}.{}.>", config.subject_prefix, subsystem),
            None => format!("{}.>", config.subject_prefix),
        };
        let feed = self.client.subscribe(vec![subtree], Some(pattern.clone())).await?;
        Ok(Box::new(feed))
    }

    async fn shutdown(&self) -> Result<()> {
        self.client.shutdown().await
    }

    async fn health(&self) -> Result<bool> {
        Ok(self.client.is_connected())
    }

    fn name(&self) -> &str {
        "jetstream"
    }
}
