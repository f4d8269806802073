//! Event publisher
//!
//! Single publishes settle with `Result<(), PublishFailure>`. Streamed and
//! periodic publishing run as spawned tasks that route each failure to an
//! `on_error` callback and keep going; they stop only when cancelled.

use crate::error::{PublishFailure, Result};
use crate::rate::check_interval;
use crate::store::EventStore;
use crate::subscription::cancelled;
use crate::types::Event;
use chrono::{DateTime, Utc};
use futures::{FutureExt, Stream, StreamExt};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

/// Handle that stops a streamed or periodic publish
///
/// Cancelling takes effect at the next tick or element boundary; a
/// publish already in flight completes. Dropping every handle leaves the
/// task running.
#[derive(Debug, Clone)]
pub struct Cancellable {
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl Cancellable {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        (
            Self {
                cancel_tx: Arc::new(cancel_tx),
            },
            cancel_rx,
        )
    }

    /// Stop future publishes; returns false if already cancelled
    pub fn cancel(&self) -> bool {
        !self.cancel_tx.send_replace(true)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }
}

/// Publish-side API over one [`EventStore`]
#[derive(Clone)]
pub struct EventPublisher {
    store: Arc<dyn EventStore>,
}

impl EventPublisher {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Publish one event
    pub async fn publish(&self, event: Event) -> std::result::Result<(), PublishFailure> {
        publish_one(self.store.as_ref(), event).await
    }

    /// Publish every element of `events` in order
    pub fn publish_stream<S, E>(&self, events: S, on_error: E) -> Cancellable
    where
        S: Stream<Item = Event> + Send + 'static,
        E: Fn(PublishFailure) + Send + Sync + 'static,
    {
        let (handle, mut cancel_rx) = Cancellable::new();
        let store = self.store.clone();

        tokio::spawn(async move {
            let mut events = std::pin::pin!(events);
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancelled(&mut cancel_rx) => break,
                    event = events.next() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                if let Err(failure) = publish_one(store.as_ref(), event).await {
                    on_error(failure);
                }
            }
            tracing::debug!("Stream publish finished");
        });

        handle
    }

    /// Call `generator` every `every` and publish what it yields
    ///
    /// The first tick fires one interval from now. A tick where the
    /// generator returns `None` or panics publishes nothing.
    ///
    /// Fails with `EventError::Config` if `every` is zero.
    pub fn publish_every<G, E>(&self, generator: G, every: Duration, on_error: E) -> Result<Cancellable>
    where
        G: FnMut() -> Option<Event> + Send + 'static,
        E: Fn(PublishFailure) + Send + Sync + 'static,
    {
        self.spawn_periodic(generator, Instant::now() + every, every, on_error)
    }

    /// Like [`publish_every`](Self::publish_every) with the first tick at `start`
    ///
    /// Later ticks follow every `every` after the first. A start in the
    /// past fires immediately, so the ticks are then spaced from now
    /// rather than from `start`.
    pub fn publish_every_from<G, E>(
        &self,
        generator: G,
        start: DateTime<Utc>,
        every: Duration,
        on_error: E,
    ) -> Result<Cancellable>
    where
        G: FnMut() -> Option<Event> + Send + 'static,
        E: Fn(PublishFailure) + Send + Sync + 'static,
    {
        self.spawn_periodic(generator, instant_at(start), every, on_error)
    }

    /// Periodic publish with an async generator
    ///
    /// Every tick runs in its own task, so a generator slower than
    /// `every` gets invoked concurrently with itself.
    pub fn publish_async_every<G, F, E>(
        &self,
        generator: G,
        every: Duration,
        on_error: E,
    ) -> Result<Cancellable>
    where
        G: FnMut() -> F + Send + 'static,
        F: Future<Output = Option<Event>> + Send + 'static,
        E: Fn(PublishFailure) + Send + Sync + 'static,
    {
        self.spawn_async_periodic(generator, Instant::now() + every, every, on_error)
    }

    pub fn publish_async_every_from<G, F, E>(
        &self,
        generator: G,
        start: DateTime<Utc>,
        every: Duration,
        on_error: E,
    ) -> Result<Cancellable>
    where
        G: FnMut() -> F + Send + 'static,
        F: Future<Output = Option<Event>> + Send + 'static,
        E: Fn(PublishFailure) + Send + Sync + 'static,
    {
        self.spawn_async_periodic(generator, instant_at(start), every, on_error)
    }

    /// Release the connection; later publishes fail with `EventError::Closed`
    pub async fn shutdown(&self) -> Result<()> {
        self.store.shutdown().await
    }

    fn spawn_periodic<G, E>(
        &self,
        mut generator: G,
        start: Instant,
        every: Duration,
        on_error: E,
    ) -> Result<Cancellable>
    where
        G: FnMut() -> Option<Event> + Send + 'static,
        E: Fn(PublishFailure) + Send + Sync + 'static,
    {
        check_interval(every)?;
        let (handle, mut cancel_rx) = Cancellable::new();
        let store = self.store.clone();
        let mut ticker = tokio::time::interval_at(start, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled(&mut cancel_rx) => break,
                    _ = ticker.tick() => {}
                }

                let event = match std::panic::catch_unwind(AssertUnwindSafe(&mut generator)) {
                    Ok(event) => event,
                    Err(_) => {
                        tracing::warn!("Event generator panicked, skipping tick");
                        None
                    }
                };
                if let Some(event) = event {
                    if let Err(failure) = publish_one(store.as_ref(), event).await {
                        on_error(failure);
                    }
                }
            }
            tracing::debug!("Periodic publish cancelled");
        });

        Ok(handle)
    }

    fn spawn_async_periodic<G, F, E>(
        &self,
        mut generator: G,
        start: Instant,
        every: Duration,
        on_error: E,
    ) -> Result<Cancellable>
    where
        G: FnMut() -> F + Send + 'static,
        F: Future<Output = Option<Event>> + Send + 'static,
        E: Fn(PublishFailure) + Send + Sync + 'static,
    {
        check_interval(every)?;
        let (handle, mut cancel_rx) = Cancellable::new();
        let store = self.store.clone();
        let on_error = Arc::new(on_error);
        let mut ticker = tokio::time::interval_at(start, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled(&mut cancel_rx) => break,
                    _ = ticker.tick() => {}
                }

                let generated = match std::panic::catch_unwind(AssertUnwindSafe(&mut generator)) {
                    Ok(fut) => fut,
                    Err(_) => {
                        tracing::warn!("Event generator panicked, skipping tick");
                        continue;
                    }
                };
                let store = store.clone();
                let on_error = on_error.clone();
                tokio::spawn(async move {
                    let event = match AssertUnwindSafe(generated).catch_unwind().await {
                        Ok(event) => event,
                        Err(_) => {
                            tracing::warn!("Event generator panicked, skipping tick");
                            None
                        }
                    };
                    if let Some(event) = event {
                        if let Err(failure) = publish_one(store.as_ref(), event).await {
                            on_error(failure);
                        }
                    }
                });
            }
            tracing::debug!("Periodic async publish cancelled");
        });

        Ok(handle)
    }
}

async fn publish_one(store: &dyn EventStore, event: Event) -> std::result::Result<(), PublishFailure> {
    match store.publish(&event).await {
        Ok(()) => Ok(()),
        Err(cause) => {
            tracing::warn!(key = %event.key, event_id = %event.id, error = %cause, "Publish failed");
            Err(PublishFailure::new(event, cause))
        }
    }
}

/// Tokio instant corresponding to a wall-clock time; the past maps to now
fn instant_at(start: DateTime<Utc>) -> Instant {
    let delay = (start - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    Instant::now() + delay
}
