//! Live feed over an ephemeral JetStream consumer

use super::config::JetStreamConfig;
use crate::codec;
use crate::error::{EventError, Result};
use crate::pattern::KeyPattern;
use crate::store::EventFeed;
use crate::types::Event;
use async_nats::jetstream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;

/// `(subject, payload)` pairs as delivered by the consumer
pub(crate) type PayloadStream = BoxStream<'static, std::result::Result<(String, Bytes), String>>;

/// Feed backed by one ephemeral pull consumer
///
/// Pattern feeds consume a whole subject subtree and skip subjects whose
/// key does not match the glob before decoding the payload.
pub struct JetStreamFeed {
    messages: Option<PayloadStream>,
    consumer_name: String,
    stream: jetstream::stream::Stream,
    config: Arc<JetStreamConfig>,
    shutdown: watch::Receiver<bool>,
    key_filter: Option<KeyPattern>,
}

impl JetStreamFeed {
    pub(crate) fn new(
        messages: PayloadStream,
        consumer_name: String,
        stream: jetstream::stream::Stream,
        config: Arc<JetStreamConfig>,
        shutdown: watch::Receiver<bool>,
        key_filter: Option<KeyPattern>,
    ) -> Self {
        Self {
            messages: Some(messages),
            consumer_name,
            stream,
            config,
            shutdown,
            key_filter,
        }
    }

    /// Name of the server-side consumer
    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }
}

#[async_trait]
impl EventFeed for JetStreamFeed {
    async fn next(&mut self) -> Result<Option<Event>> {
        loop {
            if *self.shutdown.borrow() {
                return Ok(None);
            }
            let Some(messages) = self.messages.as_mut() else {
                return Ok(None);
            };

            let msg = tokio::select! {
                msg = messages.next() => msg,
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(None);
                    }
                    continue;
                }
            };

            let (subject, payload) = match msg {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    return Err(EventError::Consumer(format!(
                        "Consumer '{}' failed: {}",
                        self.consumer_name, e
                    )))
                }
                None => return Ok(None),
            };

            if let Some(pattern) = &self.key_filter {
                match self.config.key_for(&subject) {
                    Some(key) if pattern.matches(&key) => {}
                    _ => continue,
                }
            }
            return codec::decode(&payload).map(Some);
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.messages.take().is_none() {
            return Ok(());
        }
        self.stream
            .delete_consumer(&self.consumer_name)
            .await
            .map_err(|e| EventError::Consumer(format!(
                "Failed to delete consumer '{}': {}",
                self.consumer_name, e
            )))?;

        tracing::debug!(consumer = %self.consumer_name, "Consumer deleted");
        Ok(())
    }
}
