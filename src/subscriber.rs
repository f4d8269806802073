//! Event subscriber
//!
//! Every subscription runs as one spawned dispatcher task:
//!
//! 1. open the backend feed (this is what `ready()` waits for)
//! 2. fetch and deliver the current value of every key, the sentinel for
//!    keys that were never published
//! 3. forward live updates until cancelled, optionally through a
//!    [`RateBuffer`] drained on a fixed tick
//!
//! Opening the feed before taking snapshots means an update published
//! while snapshots are fetched is never lost. Such an update may also
//! reach the feed after the snapshot already covered it, so live updates
//! for a key are dropped until one arrives that is newer than its
//! snapshot. Per-key order is kept and no value is delivered twice.

use crate::error::{EventError, Result};
use crate::pattern::KeyPattern;
use crate::rate::{Rate, RateBuffer, SubscriptionMode};
use crate::sink::{AsyncCallbackSink, CallbackSink, ChannelSink, EventSink};
use crate::store::{EventFeed, EventStore};
use crate::subscription::{cancelled, EventSubscription, Readiness, SubscriptionControl, SubscriptionStream};
use crate::types::{Event, EventCategory, EventKey, Subsystem};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;

/// Buffer between a dispatcher and a pull-based consumer
const STREAM_BUFFER: usize = 1024;

/// What a subscription listens to
#[derive(Debug, Clone)]
enum Source {
    Keys(Vec<EventKey>),
    Pattern(KeyPattern),
    ObserveEvents,
}

/// Subscribe-side API over one [`EventStore`]
#[derive(Clone)]
pub struct EventSubscriber {
    store: Arc<dyn EventStore>,
}

impl EventSubscriber {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Current value of `key`, the sentinel if it was never published
    pub async fn get(&self, key: &EventKey) -> Result<Event> {
        self.store.get(key).await
    }

    /// Current values of `keys`, in the order given
    pub async fn get_many(&self, keys: &[EventKey]) -> Result<Vec<Event>> {
        self.store.get_many(keys).await
    }

    /// Snapshot-then-live subscription as a `Stream`
    pub fn subscribe(&self, keys: impl IntoIterator<Item = EventKey>) -> SubscriptionStream {
        self.stream(Source::Keys(unique(keys)), None)
    }

    /// Like [`subscribe`](Self::subscribe), emitting on a fixed tick
    ///
    /// Fails with `EventError::Config` if `every` is zero.
    pub fn subscribe_every(
        &self,
        keys: impl IntoIterator<Item = EventKey>,
        every: Duration,
        mode: SubscriptionMode,
    ) -> Result<SubscriptionStream> {
        let rate = Rate::new(every, mode)?;
        Ok(self.stream(Source::Keys(unique(keys)), Some(rate)))
    }

    /// Deliver each event to a callback
    pub fn subscribe_callback<F>(&self, keys: impl IntoIterator<Item = EventKey>, callback: F) -> EventSubscription
    where
        F: FnMut(Event) + Send + 'static,
    {
        self.subscribe_sink(keys, CallbackSink::new(callback), None)
    }

    pub fn subscribe_callback_every<F>(
        &self,
        keys: impl IntoIterator<Item = EventKey>,
        callback: F,
        every: Duration,
        mode: SubscriptionMode,
    ) -> Result<EventSubscription>
    where
        F: FnMut(Event) + Send + 'static,
    {
        let rate = Rate::new(every, mode)?;
        Ok(self.subscribe_sink(keys, CallbackSink::new(callback), Some(rate)))
    }

    /// Deliver each event to an async callback; the next delivery waits for it
    pub fn subscribe_async<F, Fut>(&self, keys: impl IntoIterator<Item = EventKey>, callback: F) -> EventSubscription
    where
        F: FnMut(Event) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe_sink(keys, AsyncCallbackSink::new(callback), None)
    }

    pub fn subscribe_async_every<F, Fut>(
        &self,
        keys: impl IntoIterator<Item = EventKey>,
        callback: F,
        every: Duration,
        mode: SubscriptionMode,
    ) -> Result<EventSubscription>
    where
        F: FnMut(Event) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let rate = Rate::new(every, mode)?;
        Ok(self.subscribe_sink(keys, AsyncCallbackSink::new(callback), Some(rate)))
    }

    /// Deliver into an actor-style mailbox
    ///
    /// The subscription ends on its own once the receiver is dropped.
    pub fn subscribe_channel(
        &self,
        keys: impl IntoIterator<Item = EventKey>,
        mailbox: mpsc::Sender<Event>,
    ) -> EventSubscription {
        self.subscribe_sink(keys, ChannelSink::new(mailbox), None)
    }

    /// General form: any sink, optional rate adaptation
    pub fn subscribe_sink<S: EventSink>(
        &self,
        keys: impl IntoIterator<Item = EventKey>,
        sink: S,
        rate: Option<Rate>,
    ) -> EventSubscription {
        self.spawn(Source::Keys(unique(keys)), Box::new(sink), rate)
    }

    /// Live events for every key under `subsystem` matching `pattern`
    ///
    /// No snapshots are delivered: the pattern may match keys that were
    /// never published.
    pub fn psubscribe(&self, subsystem: Subsystem, pattern: &str) -> Result<SubscriptionStream> {
        let pattern = KeyPattern::new(subsystem, pattern)?;
        Ok(self.stream(Source::Pattern(pattern), None))
    }

    pub fn psubscribe_callback<F>(&self, subsystem: Subsystem, pattern: &str, callback: F) -> Result<EventSubscription>
    where
        F: FnMut(Event) + Send + 'static,
    {
        let pattern = KeyPattern::new(subsystem, pattern)?;
        Ok(self.spawn(Source::Pattern(pattern), Box::new(CallbackSink::new(callback)), None))
    }

    /// Observe events of every subsystem
    pub fn subscribe_observe_events(&self) -> SubscriptionStream {
        self.stream(Source::ObserveEvents, None)
    }

    pub fn subscribe_observe_events_callback<F>(&self, callback: F) -> EventSubscription
    where
        F: FnMut(Event) + Send + 'static,
    {
        self.spawn(Source::ObserveEvents, Box::new(CallbackSink::new(callback)), None)
    }

    fn stream(&self, source: Source, rate: Option<Rate>) -> SubscriptionStream {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let subscription = self.spawn(source, Box::new(ChannelSink::new(tx)), rate);
        SubscriptionStream::new(ReceiverStream::new(rx), subscription)
    }

    fn spawn(&self, source: Source, sink: Box<dyn EventSink>, rate: Option<Rate>) -> EventSubscription {
        let (handle, control) = EventSubscription::pair();
        let dispatcher = Dispatcher {
            store: self.store.clone(),
            source,
            sink,
            rate,
            control,
        };
        handle.attach(tokio::spawn(dispatcher.run()));
        handle
    }
}

/// Keys in first-seen order without repeats
fn unique(keys: impl IntoIterator<Item = EventKey>) -> Vec<EventKey> {
    let mut seen = HashSet::new();
    keys.into_iter().filter(|k| seen.insert(k.clone())).collect()
}

struct Dispatcher {
    store: Arc<dyn EventStore>,
    source: Source,
    sink: Box<dyn EventSink>,
    rate: Option<Rate>,
    control: SubscriptionControl,
}

impl Dispatcher {
    async fn run(mut self) {
        let mut feed = match open_feed(&self.store, &self.source).await {
            Ok(feed) => feed,
            Err(e) => {
                tracing::warn!(error = %e, "Subscription setup failed");
                self.control.ready_tx.send_replace(Readiness::Failed(e));
                return;
            }
        };
        self.control.ready_tx.send_replace(Readiness::Ready);

        self.dispatch(feed.as_mut()).await;

        if let Err(e) = feed.close().await {
            tracing::warn!(error = %e, "Failed to close subscription feed");
        }
        tracing::debug!("Subscription ended");
    }

    async fn dispatch(&mut self, feed: &mut dyn EventFeed) {
        let mut buffer = self.rate.map(|rate| RateBuffer::new(rate.mode()));

        // Snapshot delivered per key, until a live update newer than it arrives
        let mut snapshots: HashMap<EventKey, SnapshotMark> = HashMap::new();
        let keys = match &self.source {
            Source::Keys(keys) => keys.clone(),
            _ => Vec::new(),
        };
        for key in keys {
            let snapshot = match self.store.get(&key).await {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Snapshot fetch failed");
                    Event::invalid_for(key.clone())
                }
            };
            snapshots.insert(key, SnapshotMark::of(&snapshot));
            match buffer.as_mut() {
                Some(buffer) => buffer.offer(snapshot),
                None => {
                    if !self.deliver(snapshot).await {
                        return;
                    }
                }
            }
        }

        let mut ticker = self.rate.map(|rate| {
            let mut ticker = tokio::time::interval(rate.every());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });

        loop {
            tokio::select! {
                biased;

                _ = cancelled(&mut self.control.cancel_rx) => return,

                _ = self.sink.closed() => {
                    tracing::debug!("Subscription sink closed");
                    return;
                }

                _ = tick(&mut ticker) => {
                    let due = buffer.as_mut().map(|b| b.drain()).unwrap_or_default();
                    for event in due {
                        if !self.deliver(event).await {
                            return;
                        }
                    }
                }

                next = feed.next() => {
                    let event = match next {
                        Ok(Some(event)) => event,
                        Ok(None) => {
                            tracing::debug!("Subscription feed closed by backend");
                            return;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Dropping undeliverable update");
                            continue;
                        }
                    };

                    if let Some(mark) = snapshots.remove(&event.key) {
                        if mark.covers(&event) {
                            if event.id != mark.id {
                                snapshots.insert(event.key.clone(), mark);
                            }
                            continue;
                        }
                    }
                    if matches!(self.source, Source::ObserveEvents) && event.category != EventCategory::Observe {
                        continue;
                    }

                    match buffer.as_mut() {
                        Some(buffer) => buffer.offer(event),
                        None => {
                            if !self.deliver(event).await {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Push one event to the sink unless the subscription is cancelled first
    async fn deliver(&mut self, event: Event) -> bool {
        if *self.control.cancel_rx.borrow() {
            return false;
        }
        tokio::select! {
            biased;
            _ = cancelled(&mut self.control.cancel_rx) => false,
            alive = self.sink.deliver(event) => {
                if !alive {
                    tracing::debug!("Subscription sink closed");
                }
                alive
            }
        }
    }
}

async fn open_feed(store: &Arc<dyn EventStore>, source: &Source) -> Result<Box<dyn EventFeed>> {
    let feed = match source {
        Source::Keys(keys) if keys.is_empty() => return Ok(Box::new(IdleFeed)),
        Source::Keys(keys) => store.subscribe(keys).await,
        Source::Pattern(pattern) => store.psubscribe(pattern).await,
        Source::ObserveEvents => store.psubscribe(&KeyPattern::all()).await,
    };
    feed.map_err(|e| match e {
        e @ EventError::SubscriptionSetup { .. } => e,
        other => EventError::SubscriptionSetup {
            target: describe(source),
            reason: other.to_string(),
        },
    })
}

fn describe(source: &Source) -> String {
    match source {
        Source::Keys(keys) => keys.iter().map(|k| k.to_string()).collect::<Vec<_>>().join(","),
        Source::Pattern(pattern) => pattern.to_string(),
        Source::ObserveEvents => "observe events".to_string(),
    }
}

/// Identity and time of the snapshot delivered for a key
struct SnapshotMark {
    id: String,
    event_time: DateTime<Utc>,
}

impl SnapshotMark {
    fn of(snapshot: &Event) -> Self {
        Self {
            id: snapshot.id.clone(),
            event_time: snapshot.event_time,
        }
    }

    /// Whether a live update is the snapshot itself or was published before it
    fn covers(&self, event: &Event) -> bool {
        event.id == self.id || event.event_time <= self.event_time
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Feed for a subscription with no keys
struct IdleFeed;

#[async_trait::async_trait]
impl EventFeed for IdleFeed {
    async fn next(&mut self) -> Result<Option<Event>> {
        std::future::pending().await
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
