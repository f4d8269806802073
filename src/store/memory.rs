//! In-memory event store
//!
//! [`MemoryBroker`] plays the part of the server: it keeps the encoded
//! last value of every key in a sharded map and fans live updates out
//! over a broadcast channel. [`MemoryStore`] is one connection to a
//! broker and can be shut down independently of other connections.
//! Intended for tests and single-process deployments.

use crate::codec;
use crate::error::{EventError, Result};
use crate::pattern::KeyPattern;
use crate::store::{EventFeed, EventStore};
use crate::types::{Event, EventKey};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Configuration for the in-memory store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Capacity of the live-update channel before slow feeds start lagging
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Reject encoded events larger than this many bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload_bytes: Option<usize>,
}

fn default_channel_capacity() -> usize {
    10_000
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            max_payload_bytes: None,
        }
    }
}

/// An update as it travels from the broker to live feeds
#[derive(Debug)]
struct Published {
    key: EventKey,
    payload: Bytes,
}

struct BrokerInner {
    values: DashMap<EventKey, Bytes>,
    sender: broadcast::Sender<Arc<Published>>,
    config: MemoryConfig,
}

/// Shared in-process backend; clone it to hand it to more connections
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    pub fn new(config: MemoryConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            inner: Arc::new(BrokerInner {
                values: DashMap::new(),
                sender,
                config,
            }),
        }
    }

    /// Open a new connection to this broker
    pub fn connect(&self) -> MemoryStore {
        let (shutdown_tx, _) = watch::channel(false);
        MemoryStore {
            broker: self.clone(),
            shutdown_tx,
        }
    }

    /// Number of keys holding a value
    pub fn key_count(&self) -> usize {
        self.inner.values.len()
    }

    /// Number of open live feeds across all connections
    pub fn feed_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.inner.config
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

/// One connection to a [`MemoryBroker`]
pub struct MemoryStore {
    broker: MemoryBroker,
    shutdown_tx: watch::Sender<bool>,
}

impl MemoryStore {
    /// Create a store backed by its own private broker
    pub fn new(config: MemoryConfig) -> Self {
        MemoryBroker::new(config).connect()
    }

    /// The broker this connection talks to
    pub fn broker(&self) -> &MemoryBroker {
        &self.broker
    }

    fn ensure_open(&self) -> Result<()> {
        if *self.shutdown_tx.borrow() {
            return Err(EventError::Closed(
                "memory store connection is shut down".to_string(),
            ));
        }
        Ok(())
    }

    fn open_feed(&self, filter: FeedFilter) -> Result<Box<dyn EventFeed>> {
        self.ensure_open()?;
        Ok(Box::new(MemoryFeed {
            broker: self.broker.clone(),
            receiver: Some(self.broker.inner.sender.subscribe()),
            shutdown: self.shutdown_tx.subscribe(),
            filter,
            replay: VecDeque::new(),
            replayed: HashMap::new(),
            delivered: HashMap::new(),
        }))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn publish(&self, event: &Event) -> Result<()> {
        self.ensure_open()?;
        let payload = codec::encode(event)?;
        codec::check_size(event, &payload, self.broker.inner.config.max_payload_bytes)?;

        // Value first, then the notification: a feed that sees the update
        // can always fetch it.
        self.broker
            .inner
            .values
            .insert(event.key.clone(), payload.clone());
        let receivers = self
            .broker
            .inner
            .sender
            .send(Arc::new(Published {
                key: event.key.clone(),
                payload,
            }))
            .unwrap_or(0);

        tracing::debug!(
            event_id = %event.id,
            key = %event.key,
            receivers,
            "Event published"
        );
        Ok(())
    }

    async fn get(&self, key: &EventKey) -> Result<Event> {
        self.ensure_open()?;
        let payload = self.broker.inner.values.get(key).map(|v| v.value().clone());
        match payload {
            Some(payload) => codec::decode(&payload),
            None => Ok(Event::invalid_for(key.clone())),
        }
    }

    async fn subscribe(&self, keys: &[EventKey]) -> Result<Box<dyn EventFeed>> {
        let keys: HashSet<EventKey> = keys.iter().cloned().collect();
        tracing::debug!(keys = keys.len(), "Memory feed opened");
        self.open_feed(FeedFilter::Keys(keys))
    }

    async fn psubscribe(&self, pattern: &KeyPattern) -> Result<Box<dyn EventFeed>> {
        tracing::debug!(pattern = %pattern, "Memory pattern feed opened");
        self.open_feed(FeedFilter::Pattern(pattern.clone()))
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx.send_replace(true);
        tracing::info!("Memory store connection shut down");
        Ok(())
    }

    async fn health(&self) -> Result<bool> {
        Ok(!*self.shutdown_tx.borrow())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

enum FeedFilter {
    Keys(HashSet<EventKey>),
    Pattern(KeyPattern),
}

impl FeedFilter {
    fn matches(&self, key: &EventKey) -> bool {
        match self {
            FeedFilter::Keys(keys) => keys.contains(key),
            FeedFilter::Pattern(pattern) => pattern.matches(key),
        }
    }
}

/// Live feed over the broker's broadcast channel
///
/// A feed that falls behind the channel loses updates. It then skips
/// everything still queued and re-reads the current value of each key it
/// follows, so the newest value of every key still arrives.
struct MemoryFeed {
    broker: MemoryBroker,
    receiver: Option<broadcast::Receiver<Arc<Published>>>,
    shutdown: watch::Receiver<bool>,
    filter: FeedFilter,
    /// Current values re-read after a lag, not yet returned
    replay: VecDeque<Event>,
    /// Id re-read per key whose broadcast may still be queued
    replayed: HashMap<EventKey, String>,
    /// Id of the last event returned per key
    delivered: HashMap<EventKey, String>,
}

impl MemoryFeed {
    fn recover_from_lag(&mut self) {
        if let Some(receiver) = self.receiver.as_mut() {
            loop {
                match receiver.try_recv() {
                    Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                    Err(_) => break,
                }
            }
        }

        let values = &self.broker.inner.values;
        let payloads: Vec<Bytes> = match &self.filter {
            FeedFilter::Keys(keys) => keys
                .iter()
                .filter_map(|key| values.get(key).map(|v| v.value().clone()))
                .collect(),
            FeedFilter::Pattern(pattern) => values
                .iter()
                .filter(|entry| pattern.matches(entry.key()))
                .map(|entry| entry.value().clone())
                .collect(),
        };

        let mut current = Vec::with_capacity(payloads.len());
        for payload in payloads {
            match codec::decode(&payload) {
                Ok(event) => current.push(event),
                Err(e) => tracing::warn!(error = %e, "Skipping undecodable value after lag"),
            }
        }
        current.sort_by_key(|event| event.event_time);

        for event in current {
            if self.delivered.get(&event.key) == Some(&event.id) {
                continue;
            }
            self.replayed.insert(event.key.clone(), event.id.clone());
            self.replay.push_back(event);
        }
        tracing::debug!(replayed = self.replay.len(), "Memory feed resynchronised");
    }

    fn deliver(&mut self, event: Event) -> Option<Event> {
        self.delivered.insert(event.key.clone(), event.id.clone());
        Some(event)
    }
}

#[async_trait]
impl EventFeed for MemoryFeed {
    async fn next(&mut self) -> Result<Option<Event>> {
        loop {
            if *self.shutdown.borrow() {
                return Ok(None);
            }
            if let Some(event) = self.replay.pop_front() {
                return Ok(self.deliver(event));
            }
            let Some(receiver) = self.receiver.as_mut() else {
                return Ok(None);
            };

            let received = tokio::select! {
                received = receiver.recv() => received,
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(None);
                    }
                    continue;
                }
            };

            match received {
                Ok(published) => {
                    if !self.filter.matches(&published.key) {
                        continue;
                    }
                    let event = codec::decode(&published.payload)?;
                    if let Some(id) = self.replayed.remove(&event.key) {
                        if id == event.id {
                            continue;
                        }
                    }
                    return Ok(self.deliver(event));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Memory feed lagged, re-reading current values");
                    self.recover_from_lag();
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.receiver = None;
        self.replay.clear();
        Ok(())
    }
}
