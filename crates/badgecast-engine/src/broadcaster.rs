use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info, instrument, warn};

use badgecast_core::{
    BadgeCount, BadgeError, BadgeFetcher, BadgeListener, BadgeModel, BroadcasterId,
    ErrorReporter, ListenerKey,
};
use badgecast_store::BadgeStore;
use badgecast_telemetry::{metrics, TracingReporter};

use crate::config::BroadcasterConfig;
use crate::delivery::{Delivery, DeliveryContext, ListenerSlot};
use crate::refresh;
use crate::source::{BadgeSubscription, BadgeUpdateSource};

struct Registry {
    closed: bool,
    /// Registration order is delivery order.
    slots: Vec<ListenerSlot>,
}

/// Fans badge updates out to registered listeners and reactive subscribers.
///
/// `publish`, `clear_badge`, registration and unregistration all run under
/// one registry lock. Because the store update and every enqueue happen
/// inside that lock, each listener sees values in `publish` order and a newly
/// registered listener gets exactly the value current at registration.
/// Callbacks run on per-listener tasks with no lock held, so they may call
/// back into the broadcaster.
pub struct BadgeBroadcaster {
    id: BroadcasterId,
    store: Arc<BadgeStore>,
    source: BadgeUpdateSource,
    registry: Mutex<Registry>,
    fetcher: Option<Arc<dyn BadgeFetcher>>,
    reporter: Arc<dyn ErrorReporter>,
    config: BroadcasterConfig,
    runtime: Handle,
    publish_count: AtomicU64,
}

impl BadgeBroadcaster {
    /// Create a broadcaster on the ambient tokio runtime.
    pub fn new(store: Arc<BadgeStore>) -> Result<Self, BadgeError> {
        let runtime = Handle::try_current().map_err(|e| BadgeError::Runtime(e.to_string()))?;
        Ok(Self::with_runtime(store, runtime))
    }

    /// Create a broadcaster whose delivery workers run on `runtime`.
    /// Publishing is then allowed from any thread.
    pub fn with_runtime(store: Arc<BadgeStore>, runtime: Handle) -> Self {
        let source = BadgeUpdateSource::new(store.get());
        Self {
            id: BroadcasterId::new(),
            store,
            source,
            registry: Mutex::new(Registry {
                closed: false,
                slots: Vec::new(),
            }),
            fetcher: None,
            reporter: Arc::new(TracingReporter::new()),
            config: BroadcasterConfig::default(),
            runtime,
            publish_count: AtomicU64::new(0),
        }
    }

    pub fn with_config(mut self, config: BroadcasterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn BadgeFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn id(&self) -> &BroadcasterId {
        &self.id
    }

    pub fn config(&self) -> &BroadcasterConfig {
        &self.config
    }

    /// Register a listener, or re-register one already present.
    ///
    /// If a badge is cached it is queued to the listener immediately. A
    /// listener that is already registered keeps its position and its
    /// delivery queue; it is never registered twice.
    #[instrument(skip_all, fields(broadcaster = %self.id, name = listener.name()))]
    pub fn register_badge_listener(&self, listener: Arc<dyn BadgeListener>) -> ListenerKey {
        let key = ListenerKey::of(&listener);
        let mut registry = self.registry.lock();
        if registry.closed {
            debug!(listener = %key, "register after shutdown ignored");
            return key;
        }

        let cached = self.store.get();
        let existing = registry.slots.iter().position(|s| s.key() == key);
        let index = match existing {
            Some(index) => index,
            None => {
                registry
                    .slots
                    .push(ListenerSlot::spawn(listener, &self.runtime, self.delivery_context()));
                metrics::set_listener_count(registry.slots.len());
                registry.slots.len() - 1
            }
        };

        if let Some(badge) = cached {
            let _ = registry.slots[index].enqueue(Delivery::Update(badge));
        }
        debug!(
            listener = %key,
            replaced = existing.is_some(),
            listeners = registry.slots.len(),
            "badge listener registered"
        );
        key
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unregister_badge_listener(&self, listener: &Arc<dyn BadgeListener>) -> bool {
        self.unregister_key(ListenerKey::of(listener))
    }

    /// Remove a listener by the key returned at registration.
    pub fn unregister_key(&self, key: ListenerKey) -> bool {
        let mut registry = self.registry.lock();
        let Some(index) = registry.slots.iter().position(|s| s.key() == key) else {
            return false;
        };
        let slot = registry.slots.remove(index);
        slot.deactivate();
        metrics::set_listener_count(registry.slots.len());
        debug!(
            broadcaster = %self.id,
            listener = %key,
            listeners = registry.slots.len(),
            "badge listener unregistered"
        );
        true
    }

    pub fn is_registered(&self, key: ListenerKey) -> bool {
        self.registry.lock().slots.iter().any(|s| s.key() == key)
    }

    /// Store `badge` as current and queue it to every listener.
    ///
    /// Never waits on listeners. Returns the number of listeners it was
    /// queued to (0 after shutdown).
    pub fn publish(&self, badge: BadgeModel) -> usize {
        let registry = self.registry.lock();
        if registry.closed {
            debug!(broadcaster = %self.id, "publish after shutdown ignored");
            return 0;
        }

        self.store.set(badge.clone());
        self.source.emit(Some(badge.clone()));
        let _ = self.publish_count.fetch_add(1, Ordering::Relaxed);
        metrics::record_publish();

        let queued = registry
            .slots
            .iter()
            .filter(|slot| slot.enqueue(Delivery::Update(badge.clone())))
            .count();
        debug!(
            broadcaster = %self.id,
            count = badge.count(),
            app_point = badge.app_point(),
            queued,
            "badge published"
        );
        queued
    }

    /// Publish raw figures from an upstream source, stamped now.
    pub fn publish_count(&self, count: BadgeCount) -> usize {
        self.publish(BadgeModel::from(count))
    }

    /// Forget the current badge, in memory and on disk.
    ///
    /// Reactive subscribers observe `None`. Listeners are told only when
    /// `notify_listeners_on_clear` is set.
    pub fn clear_badge(&self) {
        let registry = self.registry.lock();
        if registry.closed {
            debug!(broadcaster = %self.id, "clear after shutdown ignored");
            return;
        }

        self.store.clear();
        self.source.emit(None);
        if self.config.notify_listeners_on_clear {
            for slot in &registry.slots {
                let _ = slot.enqueue(Delivery::Cleared);
            }
        }
        info!(broadcaster = %self.id, "badge cleared");
    }

    /// Fetch the badge out of band and publish it.
    ///
    /// On failure the cached badge is left as it was.
    pub async fn refresh_badge_count(&self) -> Result<BadgeModel, BadgeError> {
        if self.is_shut_down() {
            return Err(BadgeError::InvalidState("broadcaster is shut down".into()));
        }
        let Some(fetcher) = self.fetcher.as_ref() else {
            return Err(BadgeError::InvalidState("no badge fetcher configured".into()));
        };

        match refresh::fetch_with_retry(fetcher.as_ref(), &self.config).await {
            Ok(count) => {
                metrics::record_refresh("success");
                let badge = BadgeModel::from(count);
                let _ = self.publish(badge.clone());
                Ok(badge)
            }
            Err(e) => {
                metrics::record_refresh("failure");
                warn!(broadcaster = %self.id, error = %e, "badge refresh failed");
                Err(BadgeError::RefreshFailed(e))
            }
        }
    }

    /// Subscribe to the current badge followed by live changes.
    ///
    /// The first value is whatever the store holds now, the same value a
    /// listener registered at this point would be replayed.
    pub fn subscribe(&self) -> BadgeSubscription {
        let registry = self.registry.lock();
        if registry.closed {
            return self.source.subscribe();
        }
        self.source.subscribe_at(self.store.get())
    }

    /// The cached badge, if any.
    pub fn current(&self) -> Option<BadgeModel> {
        self.store.get()
    }

    pub fn listener_count(&self) -> usize {
        self.registry.lock().slots.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.source.subscriber_count()
    }

    /// Total successful `publish` calls.
    pub fn publish_count_total(&self) -> u64 {
        self.publish_count.load(Ordering::Relaxed)
    }

    /// Tear down: stop every delivery worker and end every subscription.
    /// Later calls are ignored, as is every other operation.
    pub fn shutdown(&self) {
        let mut registry = self.registry.lock();
        if registry.closed {
            return;
        }
        registry.closed = true;
        for slot in registry.slots.drain(..) {
            slot.deactivate();
        }
        self.source.close();
        metrics::set_listener_count(0);
        info!(broadcaster = %self.id, "badge broadcaster shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.registry.lock().closed
    }

    fn delivery_context(&self) -> DeliveryContext {
        DeliveryContext {
            timeout: self.config.delivery_timeout,
            reporter: Arc::clone(&self.reporter),
        }
    }
}

impl Drop for BadgeBroadcaster {
    fn drop(&mut self) {
        for slot in self.registry.get_mut().slots.drain(..) {
            slot.deactivate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use badgecast_core::{listener_fn, BadgeFetcher, FetchError, ListenerError};
    use futures::StreamExt;
    use std::time::Duration;

    #[derive(Default)]
    struct Collecting(Mutex<Vec<BadgeError>>);

    impl ErrorReporter for Collecting {
        fn report(&self, error: &BadgeError) {
            self.0.lock().push(error.clone());
        }
    }

    fn recorder(name: &str) -> (Arc<dyn BadgeListener>, Arc<Mutex<Vec<u32>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let listener = listener_fn(name, move |b| {
            seen2.lock().push(b.count());
            Ok(())
        });
        (listener, seen)
    }

    fn broadcaster() -> BadgeBroadcaster {
        BadgeBroadcaster::new(Arc::new(BadgeStore::in_memory())).unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[test]
    fn new_requires_runtime() {
        let err = BadgeBroadcaster::new(Arc::new(BadgeStore::in_memory()))
            .err()
            .unwrap();
        assert_eq!(err.error_kind(), "runtime");
    }

    #[tokio::test]
    async fn registered_listener_receives_publish() {
        let b = broadcaster();
        let (l, seen) = recorder("l");
        let _ = b.register_badge_listener(l);

        assert_eq!(b.publish(BadgeModel::now(3, 0)), 1);
        settle().await;
        assert_eq!(*seen.lock(), vec![3]);
    }

    #[tokio::test]
    async fn late_listener_gets_replay() {
        let b = broadcaster();
        let _ = b.publish(BadgeModel::now(7, 0));

        let (l, seen) = recorder("late");
        let _ = b.register_badge_listener(l);
        settle().await;
        assert_eq!(*seen.lock(), vec![7]);
    }

    #[tokio::test]
    async fn duplicate_registration_does_not_duplicate() {
        let b = broadcaster();
        let (l, seen) = recorder("dup");
        let k1 = b.register_badge_listener(Arc::clone(&l));
        let k2 = b.register_badge_listener(Arc::clone(&l));
        assert_eq!(k1, k2);
        assert_eq!(b.listener_count(), 1);

        let _ = b.publish(BadgeModel::now(1, 0));
        settle().await;
        assert_eq!(*seen.lock(), vec![1]);
    }

    #[tokio::test]
    async fn reregistration_replays_current_again() {
        let b = broadcaster();
        let (l, seen) = recorder("again");
        let _ = b.register_badge_listener(Arc::clone(&l));
        let _ = b.publish(BadgeModel::now(2, 0));
        let _ = b.register_badge_listener(Arc::clone(&l));
        settle().await;
        assert_eq!(*seen.lock(), vec![2, 2]);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let b = broadcaster();
        let (l, seen) = recorder("gone");
        let _ = b.register_badge_listener(Arc::clone(&l));
        assert!(b.unregister_badge_listener(&l));
        assert!(!b.unregister_badge_listener(&l));

        assert_eq!(b.publish(BadgeModel::now(5, 0)), 0);
        settle().await;
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn clear_suppresses_replay() {
        let b = broadcaster();
        let _ = b.publish(BadgeModel::now(5, 0));
        b.clear_badge();
        assert!(b.current().is_none());

        let (l, seen) = recorder("after-clear");
        let _ = b.register_badge_listener(l);
        settle().await;
        assert!(seen.lock().is_empty());
    }

    struct ClearCounter(Mutex<u32>);

    #[async_trait]
    impl BadgeListener for ClearCounter {
        async fn on_badge_update(&self, _badge: &BadgeModel) -> Result<(), ListenerError> {
            Ok(())
        }

        async fn on_badge_cleared(&self) -> Result<(), ListenerError> {
            *self.0.lock() += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn clear_is_silent_by_default() {
        let b = broadcaster();
        let counter = Arc::new(ClearCounter(Mutex::new(0)));
        let _ = b.register_badge_listener(counter.clone());
        b.clear_badge();
        settle().await;
        assert_eq!(*counter.0.lock(), 0);
    }

    #[tokio::test]
    async fn clear_notifies_when_configured() {
        let b = broadcaster().with_config(BroadcasterConfig::default().with_notify_on_clear(true));
        let counter = Arc::new(ClearCounter(Mutex::new(0)));
        let _ = b.register_badge_listener(counter.clone());
        b.clear_badge();
        settle().await;
        assert_eq!(*counter.0.lock(), 1);
    }

    #[tokio::test]
    async fn failing_listener_is_isolated() {
        let reporter = Arc::new(Collecting::default());
        let b = broadcaster().with_reporter(reporter.clone());
        let failing = listener_fn("failing", |_| Err(ListenerError::failed("boom")));
        let panicking = listener_fn("panicking", |_| panic!("render crashed"));
        let (ok, seen) = recorder("ok");
        let _ = b.register_badge_listener(failing);
        let _ = b.register_badge_listener(panicking);
        let _ = b.register_badge_listener(ok);

        let _ = b.publish(BadgeModel::now(1, 0));
        let _ = b.publish(BadgeModel::now(2, 0));
        settle().await;

        assert_eq!(*seen.lock(), vec![1, 2]);
        let errors = reporter.0.lock();
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().all(|e| e.error_kind() == "listener_delivery"));
    }

    #[tokio::test]
    async fn listener_can_unregister_itself_during_delivery() {
        let b = Arc::new(broadcaster());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let key_slot: Arc<Mutex<Option<ListenerKey>>> = Arc::new(Mutex::new(None));

        let listener = {
            let b = Arc::downgrade(&b);
            let seen = Arc::clone(&seen);
            let key_slot = Arc::clone(&key_slot);
            listener_fn("once", move |badge| {
                seen.lock().push(badge.count());
                if let (Some(b), Some(key)) = (b.upgrade(), *key_slot.lock()) {
                    let _ = b.unregister_key(key);
                }
                Ok(())
            })
        };
        *key_slot.lock() = Some(b.register_badge_listener(listener));

        let _ = b.publish(BadgeModel::now(1, 0));
        settle().await;
        let _ = b.publish(BadgeModel::now(2, 0));
        settle().await;

        assert_eq!(*seen.lock(), vec![1]);
        assert_eq!(b.listener_count(), 0);
    }

    struct FixedFetcher(Result<BadgeCount, FetchError>);

    #[async_trait]
    impl BadgeFetcher for FixedFetcher {
        async fn fetch_badge(&self) -> Result<BadgeCount, FetchError> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn refresh_publishes_fetched_value() {
        let b = broadcaster().with_fetcher(Arc::new(FixedFetcher(Ok(BadgeCount::new(11, 300)))));
        let (l, seen) = recorder("refresh");
        let _ = b.register_badge_listener(l);

        let badge = b.refresh_badge_count().await.unwrap();
        assert_eq!(badge.count(), 11);
        assert_eq!(b.current().unwrap().app_point(), 300);
        settle().await;
        assert_eq!(*seen.lock(), vec![11]);
    }

    #[tokio::test]
    async fn refresh_failure_keeps_cache() {
        let b = broadcaster()
            .with_fetcher(Arc::new(FixedFetcher(Err(FetchError::Rejected("401".into())))));
        let _ = b.publish(BadgeModel::now(4, 0));

        let err = b.refresh_badge_count().await.unwrap_err();
        assert_eq!(err.error_kind(), "refresh_failed");
        assert_eq!(b.current().unwrap().count(), 4);
        assert_eq!(b.publish_count_total(), 1);
    }

    #[tokio::test]
    async fn refresh_without_fetcher_is_invalid_state() {
        let b = broadcaster();
        let err = b.refresh_badge_count().await.unwrap_err();
        assert_eq!(err.error_kind(), "invalid_state");
    }

    #[tokio::test]
    async fn subscription_sees_replay_then_live() {
        let b = broadcaster();
        let _ = b.publish(BadgeModel::now(1, 0));
        let mut sub = b.subscribe();
        assert_eq!(sub.next().await.unwrap().unwrap().count(), 1);

        let _ = b.publish(BadgeModel::now(2, 0));
        assert_eq!(sub.next().await.unwrap().unwrap().count(), 2);

        b.clear_badge();
        assert_eq!(sub.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn operations_after_shutdown_are_noops() {
        let b = broadcaster();
        let (l, seen) = recorder("l");
        let _ = b.register_badge_listener(Arc::clone(&l));
        let mut sub = b.subscribe();
        let _ = sub.next().await;

        b.shutdown();
        b.shutdown();
        assert!(b.is_shut_down());
        assert_eq!(b.listener_count(), 0);
        assert_eq!(b.publish(BadgeModel::now(9, 0)), 0);
        b.clear_badge();
        let _ = b.register_badge_listener(l);
        assert_eq!(b.listener_count(), 0);
        assert!(sub.next().await.is_none());
        assert_eq!(
            b.refresh_badge_count().await.unwrap_err().error_kind(),
            "invalid_state"
        );

        settle().await;
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn subscription_replay_matches_shared_store() {
        let store = Arc::new(BadgeStore::in_memory());
        let a = BadgeBroadcaster::new(Arc::clone(&store)).unwrap();
        let b = BadgeBroadcaster::new(store).unwrap();
        let _ = a.publish(BadgeModel::now(5, 0));

        let (l, seen) = recorder("b-listener");
        let _ = b.register_badge_listener(l);
        let mut sub = b.subscribe();
        assert_eq!(sub.next().await.unwrap().map(|m| m.count()), Some(5));
        settle().await;
        assert_eq!(*seen.lock(), vec![5]);

        a.clear_badge();
        let mut after_clear = b.subscribe();
        assert_eq!(after_clear.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn starts_from_persisted_value() {
        let store = Arc::new(BadgeStore::in_memory());
        store.set(BadgeModel::now(6, 0));
        let b = BadgeBroadcaster::new(store).unwrap();
        let mut sub = b.subscribe();
        assert_eq!(sub.next().await.unwrap().unwrap().count(), 6);
    }
}
