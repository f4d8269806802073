//! Redis event store
//!
//! Keyspace model: the current value of a key is a plain Redis string
//! under the canonical key, and every publish also goes out on the pub/sub
//! channel of the same name. Both happen in one `MULTI` pipeline so a
//! subscriber that sees the notification can always read the value.

use crate::codec;
use crate::error::{EventError, Result};
use crate::pattern::KeyPattern;
use crate::store::{EventFeed, EventStore};
use crate::types::{Event, EventKey};
use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Msg};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;

/// Redis connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_url")]
    pub url: String,

    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Reject encoded events larger than this many bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload_bytes: Option<usize>,
}

fn default_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_payload_bytes: None,
        }
    }
}

impl RedisConfig {
    /// Config pointing at `host:port`
    pub fn at(host: &str, port: u16) -> Self {
        Self {
            url: format!("redis://{}:{}", host, port),
            ..Default::default()
        }
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Event store on a Redis server
pub struct RedisStore {
    client: ::redis::Client,
    conn: ConnectionManager,
    config: RedisConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl RedisStore {
    /// Connect and verify the server answers
    pub async fn connect(config: RedisConfig) -> Result<Self> {
        let client = ::redis::Client::open(config.url.as_str())
            .map_err(|e| EventError::Config(format!("Invalid Redis URL '{}': {}", config.url, e)))?;

        let conn = tokio::time::timeout(config.connect_timeout(), ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| {
                EventError::Timeout(format!(
                    "Connecting to {} timed out after {}s",
                    config.url, config.connect_timeout_secs
                ))
            })?
            .map_err(|e| EventError::Connection(format!("{}: {}", config.url, e)))?;

        tracing::info!(url = %config.url, "Connected to Redis");

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            client,
            conn,
            config,
            shutdown_tx,
        })
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<()> {
        if *self.shutdown_tx.borrow() {
            return Err(EventError::Closed("Redis connection is shut down".to_string()));
        }
        Ok(())
    }

    async fn open_pubsub(&self, target: &str) -> Result<::redis::aio::PubSub> {
        self.ensure_open()?;
        tokio::time::timeout(self.config.connect_timeout(), self.client.get_async_pubsub())
            .await
            .map_err(|_| EventError::SubscriptionSetup {
                target: target.to_string(),
                reason: "timed out opening pub/sub connection".to_string(),
            })?
            .map_err(|e| EventError::SubscriptionSetup {
                target: target.to_string(),
                reason: e.to_string(),
            })
    }

    fn feed(&self, pubsub: ::redis::aio::PubSub, pattern: Option<KeyPattern>) -> Box<dyn EventFeed> {
        Box::new(RedisFeed {
            messages: Some(pubsub.into_on_message().boxed()),
            shutdown: self.shutdown_tx.subscribe(),
            pattern,
            last_id: None,
        })
    }
}

#[async_trait]
impl EventStore for RedisStore {
    async fn publish(&self, event: &Event) -> Result<()> {
        self.ensure_open()?;
        let payload = codec::encode(event)?;
        codec::check_size(event, &payload, self.config.max_payload_bytes)?;

        let key = event.key.to_string();
        let mut conn = self.conn.clone();
        let _: () = ::redis::pipe()
            .atomic()
            .set(&key, payload.as_ref())
            .ignore()
            .publish(&key, payload.as_ref())
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| EventError::Publish {
                key: key.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!(event_id = %event.id, key = %key, "Event published");
        Ok(())
    }

    async fn get(&self, key: &EventKey) -> Result<Event> {
        self.ensure_open()?;
        let mut conn = self.conn.clone();
        let payload: Option<Vec<u8>> = conn
            .get(key.to_string())
            .await
            .map_err(|e| EventError::Store(format!("GET {} failed: {}", key, e)))?;

        match payload {
            Some(payload) => codec::decode(&payload),
            None => Ok(Event::invalid_for(key.clone())),
        }
    }

    async fn get_many(&self, keys: &[EventKey]) -> Result<Vec<Event>> {
        self.ensure_open()?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let names: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        let mut conn = self.conn.clone();
        let payloads: Vec<Option<Vec<u8>>> = ::redis::cmd("MGET")
            .arg(&names)
            .query_async(&mut conn)
            .await
            .map_err(|e| EventError::Store(format!("MGET failed: {}", e)))?;

        keys.iter()
            .zip(payloads)
            .map(|(key, payload)| match payload {
                Some(payload) => codec::decode(&payload),
                None => Ok(Event::invalid_for(key.clone())),
            })
            .collect()
    }

    async fn subscribe(&self, keys: &[EventKey]) -> Result<Box<dyn EventFeed>> {
        let channels: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        let target = channels.join(",");
        let mut pubsub = self.open_pubsub(&target).await?;

        for channel in &channels {
            pubsub
                .subscribe(channel)
                .await
                .map_err(|e| EventError::SubscriptionSetup {
                    target: channel.clone(),
                    reason: e.to_string(),
                })?;
        }

        tracing::debug!(channels = channels.len(), "Redis feed subscribed");
        Ok(self.feed(pubsub, None))
    }

    async fn psubscribe(&self, pattern: &KeyPattern) -> Result<Box<dyn EventFeed>> {
        let mut pubsub = self.open_pubsub(pattern.glob()).await?;

        for glob in pattern.redis_patterns() {
            pubsub
                .psubscribe(&glob)
                .await
                .map_err(|e| EventError::SubscriptionSetup {
                    target: glob.clone(),
                    reason: e.to_string(),
                })?;
        }

        tracing::debug!(pattern = %pattern, "Redis pattern feed subscribed");
        Ok(self.feed(pubsub, Some(pattern.clone())))
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx.send_replace(true);
        tracing::info!(url = %self.config.url, "Redis connection shut down");
        Ok(())
    }

    async fn health(&self) -> Result<bool> {
        if *self.shutdown_tx.borrow() {
            return Ok(false);
        }
        let mut conn = self.conn.clone();
        let pong: std::result::Result<String, _> = ::redis::cmd("PING").query_async(&mut conn).await;
        Ok(pong.is_ok())
    }

    fn name(&self) -> &str {
        "redis"
    }
}

struct RedisFeed {
    messages: Option<BoxStream<'static, Msg>>,
    shutdown: watch::Receiver<bool>,
    /// Client-side check for pattern feeds
    pattern: Option<KeyPattern>,
    /// Overlapping `PSUBSCRIBE` patterns deliver one publish once per
    /// pattern, back to back
    last_id: Option<String>,
}

#[async_trait]
impl EventFeed for RedisFeed {
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

            let Some(msg) = msg else {
                return Ok(None);
            };

            if let Some(pattern) = &self.pattern {
                if !pattern.matches_str(msg.get_channel_name()) {
                    continue;
                }
            }
            let event = codec::decode(msg.get_payload_bytes())?;
            if self.pattern.is_some() {
                if self.last_id.as_deref() == Some(event.id.as_str()) {
                    continue;
                }
                self.last_id = Some(event.id.clone());
            }
            return Ok(Some(event));
        }
    }

    async fn close(&mut self) -> Result<()> {
        // Dropping the stream drops the dedicated pub/sub connection
        self.messages = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RedisConfig::default();
        assert_eq!(config.url, "redis://127.0.0.1:6379");
        assert_eq!(config.connect_timeout_secs, 5);
        assert!(config.max_payload_bytes.is_none());
    }

    #[test]
    fn test_config_at() {
        let config = RedisConfig::at("event-server", 26379);
        assert_eq!(config.url, "redis://event-server:26379");
    }

    #[test]
    fn test_config_deserialize_defaults() {
        let config: RedisConfig = serde_json::from_str(r#"{"max_payload_bytes": 1024}"#).unwrap();
        assert_eq!(config.url, default_url());
        assert_eq!(config.max_payload_bytes, Some(1024));
    }

    #[tokio::test]
    async fn test_invalid_url_is_config_error() {
        let config = RedisConfig {
            url: "not a url".to_string(),
            ..Default::default()
        };
        let err = RedisStore::connect(config).await.err().unwrap();
        assert!(matches!(err, EventError::Config(_)));
    }
}
