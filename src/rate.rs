//! Rate-adapted delivery
//!
//! A rate-adapted subscription buffers live updates and hands them to the
//! sink on a fixed tick instead of as they arrive. Only the latest value
//! per key survives between ticks.

use crate::error::{EventError, Result};
use crate::types::{Event, EventKey};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// How buffered values are emitted on each tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionMode {
    /// Emit the latest value of every key seen so far, even if unchanged
    #[default]
    RateAdapter,
    /// Emit only keys updated since the previous tick
    RateLimiter,
}

/// Tick interval plus emission mode; the interval is never zero
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    every: Duration,
    mode: SubscriptionMode,
}

impl Rate {
    /// Fails with `EventError::Config` if `every` is zero
    pub fn new(every: Duration, mode: SubscriptionMode) -> Result<Self> {
        check_interval(every)?;
        Ok(Self { every, mode })
    }

    pub fn adapter(every: Duration) -> Result<Self> {
        Self::new(every, SubscriptionMode::RateAdapter)
    }

    pub fn limiter(every: Duration) -> Result<Self> {
        Self::new(every, SubscriptionMode::RateLimiter)
    }

    pub fn every(&self) -> Duration {
        self.every
    }

    pub fn mode(&self) -> SubscriptionMode {
        self.mode
    }
}

/// Reject the zero period a tokio interval cannot tick at
pub(crate) fn check_interval(every: Duration) -> Result<()> {
    if every.is_zero() {
        return Err(EventError::Config("Tick interval must be greater than zero".to_string()));
    }
    Ok(())
}

/// Keep-latest buffer drained once per tick
#[derive(Debug)]
pub struct RateBuffer {
    mode: SubscriptionMode,
    latest: HashMap<EventKey, Event>,
    /// First-seen order, so every tick emits keys in a stable order
    order: Vec<EventKey>,
    updated: HashSet<EventKey>,
}

impl RateBuffer {
    pub fn new(mode: SubscriptionMode) -> Self {
        Self {
            mode,
            latest: HashMap::new(),
            order: Vec::new(),
            updated: HashSet::new(),
        }
    }

    /// Record `event` as the latest value for its key
    pub fn offer(&mut self, event: Event) {
        let key = event.key.clone();
        if self.latest.insert(key.clone(), event).is_none() {
            self.order.push(key.clone());
        }
        self.updated.insert(key);
    }

    /// Events to emit on this tick
    pub fn drain(&mut self) -> Vec<Event> {
        let events = match self.mode {
            SubscriptionMode::RateAdapter => self
                .order
                .iter()
                .filter_map(|key| self.latest.get(key).cloned())
                .collect(),
            SubscriptionMode::RateLimiter => self
                .order
                .iter()
                .filter(|key| self.updated.contains(*key))
                .filter_map(|key| self.latest.get(key).cloned())
                .collect(),
        };
        self.updated.clear();
        events
    }

    /// Number of keys holding a value
    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}
