//! Delivery sinks
//!
//! A subscription's dispatcher only knows how to push an event into an
//! [`EventSink`]. The adapters here turn that into a plain callback, an
//! async callback, or a channel send (which also backs the pull-based
//! [`SubscriptionStream`](crate::SubscriptionStream) and actor-style
//! mailboxes).

use crate::types::Event;
use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::sync::mpsc;

/// Destination for delivered events
#[async_trait]
pub trait EventSink: Send + 'static {
    /// Deliver one event; return `false` once the sink can take no more
    async fn deliver(&mut self, event: Event) -> bool;

    /// Resolves once the sink can take no more events, so an idle
    /// subscription notices a gone consumer without waiting for an update.
    /// Sinks that never close keep the default, which never resolves.
    async fn closed(&mut self) {
        std::future::pending::<()>().await
    }
}

/// Synchronous callback; a panic in the callback drops that one event
pub struct CallbackSink<F> {
    callback: F,
}

impl<F> CallbackSink<F>
where
    F: FnMut(Event) + Send + 'static,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F> EventSink for CallbackSink<F>
where
    F: FnMut(Event) + Send + 'static,
{
    async fn deliver(&mut self, event: Event) -> bool {
        let key = event.key.clone();
        let callback = &mut self.callback;
        if std::panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
            tracing::warn!(key = %key, "Subscriber callback panicked");
        }
        true
    }
}

/// Async callback, awaited before the next event is delivered
pub struct AsyncCallbackSink<F> {
    callback: F,
}

impl<F, Fut> AsyncCallbackSink<F>
where
    F: FnMut(Event) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F, Fut> EventSink for AsyncCallbackSink<F>
where
    F: FnMut(Event) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn deliver(&mut self, event: Event) -> bool {
        let key = event.key.clone();
        let fut = (self.callback)(event);
        if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
            tracing::warn!(key = %key, "Subscriber async callback panicked");
        }
        true
    }
}

/// Forwards events into an mpsc channel; stops when the receiver is dropped
pub struct ChannelSink {
    sender: mpsc::Sender<Event>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn deliver(&mut self, event: Event) -> bool {
        self.sender.send(event).await.is_ok()
    }

    async fn closed(&mut self) {
        self.sender.closed().await
    }
}

#[async_trait]
impl EventSink for mpsc::UnboundedSender<Event> {
    async fn deliver(&mut self, event: Event) -> bool {
        self.send(event).is_ok()
    }

    async fn closed(&mut self) {
        mpsc::UnboundedSender::closed(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventKey, EventName, Prefix};
    use std::sync::{Arc, Mutex};

    fn event(name: &str) -> Event {
        Event::system(Prefix::parse("tcs.mount").unwrap(), EventName::new(name).unwrap())
    }

    #[tokio::test]
    async fn test_callback_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let mut sink = CallbackSink::new(move |e: Event| seen_clone.lock().unwrap().push(e.key));

        assert!(sink.deliver(event("azimuth")).await);
        assert!(sink.deliver(event("elevation")).await);

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                EventKey::parse("tcs.mount.azimuth").unwrap(),
                EventKey::parse("tcs.mount.elevation").unwrap()
            ]
        );
    }

    #[tokio::test]
    async fn test_callback_panic_is_contained() {
        let count = Arc::new(Mutex::new(0));
        let count_clone = count.clone();
        let mut sink = CallbackSink::new(move |e: Event| {
            if e.key.name().as_str() == "bad" {
                panic!("callback failure");
            }
            *count_clone.lock().unwrap() += 1;
        });

        assert!(sink.deliver(event("bad")).await);
        assert!(sink.deliver(event("good")).await);
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_async_callback_sink() {
        let seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let mut sink = AsyncCallbackSink::new(move |e: Event| {
            let seen = seen_clone.clone();
            async move {
                tokio::task::yield_now().await;
                seen.lock().await.push(e.id);
            }
        });

        let first = event("azimuth");
        let second = event("azimuth");
        assert!(sink.deliver(first.clone()).await);
        assert!(sink.deliver(second.clone()).await);
        assert_eq!(*seen.lock().await, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn test_channel_sink_stops_when_receiver_dropped() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut sink = ChannelSink::new(tx);

        let e = event("azimuth");
        assert!(sink.deliver(e.clone()).await);
        assert_eq!(rx.recv().await.unwrap(), e);

        drop(rx);
        assert!(!sink.deliver(event("azimuth")).await);
    }

    #[tokio::test]
    async fn test_channel_sink_closed_resolves_without_delivery() {
        let (tx, rx) = mpsc::channel(4);
        let mut sink = ChannelSink::new(tx);

        let pending = tokio::time::timeout(std::time::Duration::from_millis(20), sink.closed()).await;
        assert!(pending.is_err());

        drop(rx);
        tokio::time::timeout(std::time::Duration::from_secs(1), sink.closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unbounded_sender_sink() {
        let (mut tx, mut rx) = mpsc::unbounded_channel();
        let e = event("azimuth");
        assert!(tx.deliver(e.clone()).await);
        assert_eq!(rx.recv().await.unwrap(), e);
    }
}
