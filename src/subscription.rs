//! Subscription handles

use crate::error::{EventError, Result};
use crate::types::Event;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

/// Setup progress of a subscription's backend feed
#[derive(Debug, Clone)]
pub(crate) enum Readiness {
    Pending,
    Ready,
    Failed(EventError),
}

/// Dispatcher side of a subscription
pub(crate) struct SubscriptionControl {
    pub ready_tx: watch::Sender<Readiness>,
    pub cancel_rx: watch::Receiver<bool>,
}

struct Inner {
    cancel_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<Readiness>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a live subscription
///
/// Cloning yields another handle to the same subscription. Dropping every
/// handle detaches the subscription, which keeps delivering until its
/// sink goes away or the connection is shut down.
#[derive(Clone)]
pub struct EventSubscription {
    inner: Arc<Inner>,
}

impl EventSubscription {
    /// Create the handle and its dispatcher-side control block
    pub(crate) fn pair() -> (Self, SubscriptionControl) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (ready_tx, ready_rx) = watch::channel(Readiness::Pending);
        let handle = Self {
            inner: Arc::new(Inner {
                cancel_tx,
                ready_rx,
                task: Mutex::new(None),
            }),
        };
        (handle, SubscriptionControl { ready_tx, cancel_rx })
    }

    pub(crate) fn attach(&self, task: JoinHandle<()>) {
        // Called right after spawn, before the handle is shared
        if let Ok(mut slot) = self.inner.task.try_lock() {
            *slot = Some(task);
        }
    }

    /// Resolves once the backend is listening
    ///
    /// Fails with `EventError::SubscriptionSetup` if the feed could not be
    /// opened. Publishing right after subscribing without awaiting this
    /// may lose the first update.
    pub async fn ready(&self) -> Result<()> {
        let mut ready_rx = self.inner.ready_rx.clone();
        let state = ready_rx
            .wait_for(|state| !matches!(state, Readiness::Pending))
            .await
            .map(|state| state.clone())
            .map_err(|_| EventError::SubscriptionSetup {
                target: String::new(),
                reason: "subscription ended before it was ready".to_string(),
            })?;

        match state {
            Readiness::Failed(e) => Err(e),
            _ => Ok(()),
        }
    }

    /// Stop delivery and release the backend feed
    ///
    /// Idempotent. When this returns the sink receives nothing further.
    pub async fn unsubscribe(&self) -> Result<()> {
        self.inner.cancel_tx.send_replace(true);
        let task = self.inner.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::warn!("Subscription dispatcher panicked: {}", e);
                }
            }
        }
        Ok(())
    }

    /// Whether `unsubscribe` has been called
    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancel_tx.borrow()
    }
}

/// Resolves once a cancel flag is set; never if every handle is gone
pub(crate) async fn cancelled(cancel_rx: &mut watch::Receiver<bool>) {
    let orphaned = cancel_rx.wait_for(|c| *c).await.is_err();
    if orphaned {
        std::future::pending::<()>().await;
    }
}

/// Pull-based subscription: a `Stream` of events plus its handle
///
/// Dropping the stream ends the subscription.
pub struct SubscriptionStream {
    events: ReceiverStream<Event>,
    subscription: EventSubscription,
}

impl SubscriptionStream {
    pub(crate) fn new(events: ReceiverStream<Event>, subscription: EventSubscription) -> Self {
        Self {
            events,
            subscription,
        }
    }

    /// Handle to the underlying subscription
    pub fn subscription(&self) -> &EventSubscription {
        &self.subscription
    }

    pub async fn ready(&self) -> Result<()> {
        self.subscription.ready().await
    }

    pub async fn unsubscribe(&self) -> Result<()> {
        self.subscription.unsubscribe().await
    }
}

impl Stream for SubscriptionStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_ready_resolves() {
        let (handle, control) = EventSubscription::pair();
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.ready().await })
        };
        control.ready_tx.send_replace(Readiness::Ready);
        assert!(waiter.await.unwrap().is_ok());
        // Later callers see the settled state immediately
        assert!(handle.ready().await.is_ok());
    }

    #[tokio::test]
    async fn test_ready_reports_setup_failure() {
        let (handle, control) = EventSubscription::pair();
        control.ready_tx.send_replace(Readiness::Failed(EventError::SubscriptionSetup {
            target: "tcs.mount.azimuth".to_string(),
            reason: "refused".to_string(),
        }));
        let err = handle.ready().await.unwrap_err();
        assert!(matches!(err, EventError::SubscriptionSetup { .. }));
    }

    #[tokio::test]
    async fn test_ready_fails_if_dispatcher_vanishes() {
        let (handle, control) = EventSubscription::pair();
        drop(control);
        assert!(handle.ready().await.is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent_and_waits_for_task() {
        let (handle, mut control) = EventSubscription::pair();
        let task = tokio::spawn(async move {
            let _ = control.cancel_rx.wait_for(|c| *c).await;
            tokio::time::sleep(Duration::from_millis(10)).await;
        });
        handle.attach(task);

        assert!(!handle.is_cancelled());
        handle.unsubscribe().await.unwrap();
        assert!(handle.is_cancelled());
        handle.unsubscribe().await.unwrap();
    }
}
