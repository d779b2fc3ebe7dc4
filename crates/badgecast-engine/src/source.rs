use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

use badgecast_core::BadgeModel;
use badgecast_telemetry::metrics;

/// Reactive view of the current badge.
///
/// Every subscription starts with the current value (`None` when the badge
/// is cleared) and then follows live changes. A subscriber that falls behind
/// observes the newest value; it never sees an older value after a newer one.
pub struct BadgeUpdateSource {
    tx: Arc<SharedSender>,
}

type SharedSender = RwLock<Option<watch::Sender<Option<BadgeModel>>>>;

impl BadgeUpdateSource {
    pub fn new(initial: Option<BadgeModel>) -> Self {
        let (tx, _) = watch::channel(initial);
        Self {
            tx: Arc::new(RwLock::new(Some(tx))),
        }
    }

    /// Start a new subscription. After [`close`](Self::close) the returned
    /// subscription is already finished.
    pub fn subscribe(&self) -> BadgeSubscription {
        let guard = self.tx.read();
        match guard.as_ref() {
            Some(tx) => {
                let sub = BadgeSubscription {
                    inner: Some(WatchStream::new(tx.subscribe())),
                    source: Arc::downgrade(&self.tx),
                };
                metrics::set_subscriber_count(tx.receiver_count());
                sub
            }
            None => BadgeSubscription {
                inner: None,
                source: Weak::new(),
            },
        }
    }

    /// Start a subscription whose first value is `current`.
    ///
    /// The store behind a broadcaster may be written by someone else, so the
    /// caller passes what the store holds now. Existing subscribers are woken
    /// only if that differs from what they last saw.
    pub(crate) fn subscribe_at(&self, current: Option<BadgeModel>) -> BadgeSubscription {
        if let Some(tx) = self.tx.read().as_ref() {
            let _ = tx.send_if_modified(|value| {
                if *value == current {
                    return false;
                }
                *value = current;
                true
            });
        }
        self.subscribe()
    }

    /// Replace the current value and wake every subscriber.
    pub(crate) fn emit(&self, value: Option<BadgeModel>) {
        if let Some(tx) = self.tx.read().as_ref() {
            let _ = tx.send_replace(value);
        }
    }

    /// Current value as seen by new subscribers.
    pub fn current(&self) -> Option<BadgeModel> {
        self.tx
            .read()
            .as_ref()
            .and_then(|tx| tx.borrow().clone())
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.read().as_ref().map_or(0, |tx| tx.receiver_count())
    }

    /// End every live subscription.
    pub(crate) fn close(&self) {
        if self.tx.write().take().is_some() {
            debug!("badge update source closed");
            metrics::set_subscriber_count(0);
        }
    }
}

impl Default for BadgeUpdateSource {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Cancellable stream of badge values. Dropping it unsubscribes.
pub struct BadgeSubscription {
    inner: Option<WatchStream<Option<BadgeModel>>>,
    source: Weak<SharedSender>,
}

impl BadgeSubscription {
    /// Stop receiving values and release the underlying receiver.
    pub fn cancel(&mut self) {
        if self.inner.take().is_some() {
            self.report_subscribers();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_none()
    }

    fn report_subscribers(&self) {
        if let Some(tx) = self.source.upgrade() {
            metrics::set_subscriber_count(tx.read().as_ref().map_or(0, |tx| tx.receiver_count()));
        }
    }
}

impl Drop for BadgeSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl Stream for BadgeSubscription {
    type Item = Option<BadgeModel>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(inner) = self.inner.as_mut() else {
            return Poll::Ready(None);
        };
        match Pin::new(inner).poll_next(cx) {
            Poll::Ready(None) => {
                self.inner = None;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::metrics::{
        Counter, Gauge, GaugeFn, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
    };
    use futures::StreamExt;
    use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
    use std::time::Duration;

    async fn next(sub: &mut BadgeSubscription) -> Option<Option<BadgeModel>> {
        tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .expect("subscription stalled")
    }

    #[tokio::test]
    async fn replays_current_value_first() {
        let source = BadgeUpdateSource::new(Some(BadgeModel::now(4, 0)));
        let mut sub = source.subscribe();
        let first = next(&mut sub).await.unwrap();
        assert_eq!(first.unwrap().count(), 4);
    }

    #[tokio::test]
    async fn empty_source_replays_none() {
        let source = BadgeUpdateSource::default();
        let mut sub = source.subscribe();
        assert_eq!(next(&mut sub).await, Some(None));
    }

    #[tokio::test]
    async fn follows_live_updates() {
        let source = BadgeUpdateSource::default();
        let mut sub = source.subscribe();
        assert_eq!(next(&mut sub).await, Some(None));

        source.emit(Some(BadgeModel::now(1, 0)));
        assert_eq!(next(&mut sub).await.unwrap().unwrap().count(), 1);

        source.emit(None);
        assert_eq!(next(&mut sub).await, Some(None));
    }

    #[tokio::test]
    async fn lagging_subscriber_sees_latest() {
        let source = BadgeUpdateSource::default();
        let mut sub = source.subscribe();
        let _ = next(&mut sub).await;

        for i in 1..=10 {
            source.emit(Some(BadgeModel::now(i, 0)));
        }
        assert_eq!(next(&mut sub).await.unwrap().unwrap().count(), 10);
    }

    #[tokio::test]
    async fn cancel_finishes_stream() {
        let source = BadgeUpdateSource::default();
        let mut sub = source.subscribe();
        assert_eq!(source.subscriber_count(), 1);

        sub.cancel();
        assert!(sub.is_cancelled());
        assert_eq!(source.subscriber_count(), 0);
        assert_eq!(next(&mut sub).await, None);
    }

    #[tokio::test]
    async fn close_ends_subscriptions() {
        let source = BadgeUpdateSource::default();
        let mut sub = source.subscribe();
        let _ = next(&mut sub).await;

        source.close();
        assert_eq!(next(&mut sub).await, None);
        assert!(source.subscribe().is_cancelled());
        assert!(source.current().is_none());
    }

    #[tokio::test]
    async fn subscribe_at_catches_up_with_store() {
        let source = BadgeUpdateSource::default();
        let mut early = source.subscribe();
        assert_eq!(next(&mut early).await, Some(None));

        let mut late = source.subscribe_at(Some(BadgeModel::now(5, 0)));
        assert_eq!(next(&mut late).await.unwrap().unwrap().count(), 5);
        assert_eq!(next(&mut early).await.unwrap().unwrap().count(), 5);
        assert_eq!(source.current().unwrap().count(), 5);
    }

    #[tokio::test]
    async fn subscribe_at_same_value_does_not_wake_others() {
        let badge = BadgeModel::now(2, 0);
        let source = BadgeUpdateSource::new(Some(badge.clone()));
        let mut early = source.subscribe();
        let _ = next(&mut early).await;

        let _late = source.subscribe_at(Some(badge));
        let woke = tokio::time::timeout(Duration::from_millis(50), early.next()).await;
        assert!(woke.is_err());
    }

    #[derive(Default)]
    struct LastGauge(AtomicU64);

    impl GaugeFn for LastGauge {
        fn increment(&self, _value: f64) {}
        fn decrement(&self, _value: f64) {}
        fn set(&self, value: f64) {
            self.0.store(value.to_bits(), AtomicOrdering::Relaxed);
        }
    }

    #[derive(Default)]
    struct SubscriberGauge(Arc<LastGauge>);

    impl SubscriberGauge {
        fn value(&self) -> f64 {
            f64::from_bits(self.0 .0.load(AtomicOrdering::Relaxed))
        }
    }

    impl Recorder for SubscriberGauge {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, _: &Key, _: &Metadata<'_>) -> Counter {
            Counter::noop()
        }

        fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
            if key.name() == metrics::SUBSCRIBERS {
                Gauge::from_arc(Arc::clone(&self.0))
            } else {
                Gauge::noop()
            }
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }

    #[test]
    fn subscriber_gauge_follows_cancel_and_drop() {
        let recorder = SubscriberGauge::default();
        ::metrics::with_local_recorder(&recorder, || {
            let source = BadgeUpdateSource::default();
            let mut a = source.subscribe();
            let b = source.subscribe();
            assert_eq!(recorder.value(), 2.0);

            a.cancel();
            assert_eq!(recorder.value(), 1.0);
            a.cancel();
            assert_eq!(recorder.value(), 1.0);

            drop(b);
            assert_eq!(recorder.value(), 0.0);
        });
    }

    #[tokio::test]
    async fn each_subscription_restarts_from_current() {
        let source = BadgeUpdateSource::default();
        source.emit(Some(BadgeModel::now(2, 0)));
        let mut a = source.subscribe();
        source.emit(Some(BadgeModel::now(3, 0)));
        let mut b = source.subscribe();

        assert_eq!(next(&mut a).await.unwrap().unwrap().count(), 3);
        assert_eq!(next(&mut b).await.unwrap().unwrap().count(), 3);
    }
}
