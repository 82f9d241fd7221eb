use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::registry::LocalCacheRegistry;
use crate::broadcast::{BroadcastChannel, MessageStream, topic_for};
use crate::error::BroadcastError;
use crate::event::{InvalidationEvent, InvalidationType};
use crate::metrics::InvalidationCounters;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// What the subscriber did with one received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Published by this instance; its L1 was already updated directly.
    SelfSkipped,
    Evicted,
    Cleared,
    /// No local cache with the event's name lives in this process.
    UnknownCache,
    /// The payload was not a well-formed invalidation event.
    Invalid,
}

/// Applies invalidation events from other instances to local L1 layers.
///
/// ## How It Works
///
/// 1. `watch(cache)` subscribes to the cache's topic and spawns a listener
/// 2. Events whose `sourceInstanceId` is our own are skipped
/// 3. `EVICT` removes one key, `CLEAR_ALL` empties the named L1
/// 4. Lost subscriptions are re-established with exponential backoff
/// 5. A listener that fell behind clears its L1, since the lost events are unknown
///
/// The subscriber never touches L2.
pub struct InvalidationSubscriber {
    instance_id: String,
    channel: Arc<dyn BroadcastChannel>,
    topic_prefix: String,
    registry: LocalCacheRegistry,
    counters: Arc<InvalidationCounters>,
    max_backoff: Duration,
    /// Per cache, set once the first subscription attempt has finished.
    watched: DashMap<String, Arc<OnceCell<()>>>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl InvalidationSubscriber {
    pub fn new(
        instance_id: impl Into<String>,
        channel: Arc<dyn BroadcastChannel>,
        topic_prefix: impl Into<String>,
        registry: LocalCacheRegistry,
        counters: Arc<InvalidationCounters>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            channel,
            topic_prefix: topic_prefix.into(),
            registry,
            counters,
            max_backoff: Duration::from_secs(300),
            watched: DashMap::new(),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Cap for the reconnect backoff.
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff.max(INITIAL_BACKOFF);
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn registry(&self) -> &LocalCacheRegistry {
        &self.registry
    }

    pub fn counters(&self) -> &Arc<InvalidationCounters> {
        &self.counters
    }

    pub fn is_watching(&self, cache_name: &str) -> bool {
        self.watched
            .get(cache_name)
            .is_some_and(|started| started.initialized())
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Start listening on the topic of `cache_name`.
    ///
    /// The first subscription attempt completes before this returns, so events
    /// published afterwards are not missed. Concurrent calls for the same
    /// cache all wait for that one attempt; later calls return at once.
    pub async fn watch(self: &Arc<Self>, cache_name: &str) {
        if self.cancel.is_cancelled() {
            return;
        }

        let started = Arc::clone(self.watched.entry(cache_name.to_string()).or_default().value());
        started.get_or_init(|| self.start_listener(cache_name)).await;
    }

    async fn start_listener(self: &Arc<Self>, cache_name: &str) {
        let topic = topic_for(&self.topic_prefix, cache_name);
        let initial = self.channel.subscribe(&topic).await;
        if initial.is_ok() {
            tracing::info!(
                cache = %cache_name,
                topic = %topic,
                backend = self.channel.backend_name(),
                "listening for cache invalidation"
            );
        }

        let this = Arc::clone(self);
        self.tasks.spawn(this.run(cache_name.to_string(), topic, initial));
    }

    /// Stop every listener and wait for them to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        tracing::info!(instance_id = %self.instance_id, "invalidation subscriber stopped");
    }

    async fn run(
        self: Arc<Self>,
        cache_name: String,
        topic: String,
        initial: Result<MessageStream, BroadcastError>,
    ) {
        let mut backoff = INITIAL_BACKOFF;
        let mut pending = Some(initial);

        loop {
            let subscribed = match pending.take() {
                Some(result) => result,
                None => tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    result = self.channel.subscribe(&topic) => result,
                },
            };

            let outcome = match subscribed {
                Ok(stream) => {
                    backoff = INITIAL_BACKOFF;
                    self.consume(&cache_name, &topic, stream).await
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => return,
                Err(e) => {
                    tracing::error!(
                        topic = %topic,
                        error = %e,
                        backoff_secs = backoff.as_secs(),
                        "cache invalidation listener error, reconnecting..."
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(self.max_backoff);
                }
            }
        }
    }

    /// Drain `stream` until cancelled (`Ok`) or the subscription is lost (`Err`).
    async fn consume(
        &self,
        cache_name: &str,
        topic: &str,
        mut stream: MessageStream,
    ) -> Result<(), BroadcastError> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                message = stream.next() => match message {
                    Some(Ok(payload)) => {
                        self.on_payload(&payload);
                    }
                    Some(Err(BroadcastError::Lagged(missed))) => {
                        self.on_lagged(cache_name, missed);
                    }
                    Some(Err(e)) => {
                        self.counters.record_skipped_invalid();
                        tracing::warn!(topic = %topic, error = %e, "failed to read invalidation message");
                    }
                    None => {
                        tracing::warn!(topic = %topic, "invalidation stream ended");
                        return Err(BroadcastError::StreamEnded);
                    }
                }
            }
        }
    }

    /// Recover from `missed` lost events on the topic of `cache_name`.
    ///
    /// Which keys they named is unknown, so the whole L1 is dropped and
    /// refilled from L2 on demand.
    pub fn on_lagged(&self, cache_name: &str, missed: u64) -> Disposition {
        self.counters.record_lagged();
        let Some(l1) = self.registry.get(cache_name) else {
            return Disposition::UnknownCache;
        };
        l1.clear();
        tracing::warn!(cache = %cache_name, missed, "invalidation listener lagged, cleared L1");
        Disposition::Cleared
    }

    /// Parse and apply one raw message.
    pub fn on_payload(&self, payload: &str) -> Disposition {
        match InvalidationEvent::from_payload(payload) {
            Ok(event) => self.on_event(&event),
            Err(e) => {
                self.counters.record_skipped_invalid();
                tracing::warn!(error = %e, payload = %payload, "discarding malformed invalidation event");
                Disposition::Invalid
            }
        }
    }

    /// Apply one event to the local layer of its cache.
    pub fn on_event(&self, event: &InvalidationEvent) -> Disposition {
        match event.kind() {
            InvalidationType::Evict => self.counters.record_received_evict(),
            InvalidationType::ClearAll => self.counters.record_received_clear_all(),
        }

        if event.source_instance_id() == self.instance_id {
            self.counters.record_skipped_self();
            tracing::trace!(cache = %event.cache_name(), "skipping own invalidation event");
            return Disposition::SelfSkipped;
        }

        let Some(l1) = self.registry.get(event.cache_name()) else {
            self.counters.record_skipped_unknown_cache();
            tracing::debug!(cache = %event.cache_name(), "invalidation for a cache not present locally");
            return Disposition::UnknownCache;
        };

        match (event.kind(), event.key()) {
            (InvalidationType::Evict, Some(key)) => {
                l1.evict(key);
                tracing::debug!(
                    cache = %event.cache_name(),
                    key = %key,
                    source = %event.source_instance_id(),
                    "evicted from L1 by remote invalidation"
                );
                Disposition::Evicted
            }
            (InvalidationType::ClearAll, _) => {
                l1.clear();
                tracing::debug!(
                    cache = %event.cache_name(),
                    source = %event.source_instance_id(),
                    "cleared L1 by remote invalidation"
                );
                Disposition::Cleared
            }
            // Rejected at parse time; only reachable for hand-built events.
            (InvalidationType::Evict, None) => {
                self.counters.record_skipped_invalid();
                Disposition::Invalid
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::broadcast::LocalBroadcast;
    use crate::local::{LocalCache, MokaLocalCache};

    fn subscriber_with(
        instance_id: &str,
        l1: Arc<dyn LocalCache<String>>,
    ) -> InvalidationSubscriber {
        let registry = LocalCacheRegistry::new();
        registry.register(l1);
        InvalidationSubscriber::new(
            instance_id,
            Arc::new(LocalBroadcast::new()),
            "cache:invalidation",
            registry,
            Arc::new(InvalidationCounters::new()),
        )
    }

    fn l1(name: &str) -> Arc<dyn LocalCache<String>> {
        Arc::new(MokaLocalCache::new(name, 100, Duration::from_secs(60)))
    }

    #[test]
    fn test_own_event_is_skipped() {
        let cache = l1("character");
        cache.put("k", "v".to_string());
        let subscriber = subscriber_with("node-a", Arc::clone(&cache));

        let disposition = subscriber.on_event(&InvalidationEvent::evict("character", "k", "node-a"));

        assert_eq!(disposition, Disposition::SelfSkipped);
        assert_eq!(cache.get("k"), Some("v".to_string()));
        assert_eq!(subscriber.counters().snapshot().skipped_self, 1);
    }

    #[test]
    fn test_unknown_cache() {
        let subscriber = subscriber_with("node-a", l1("character"));
        let disposition = subscriber.on_event(&InvalidationEvent::clear_all("equipment", "node-b"));
        assert_eq!(disposition, Disposition::UnknownCache);
    }

    #[test]
    fn test_malformed_payload() {
        let subscriber = subscriber_with("node-a", l1("character"));
        assert_eq!(subscriber.on_payload("{not json"), Disposition::Invalid);
        assert_eq!(subscriber.counters().snapshot().skipped_invalid, 1);
    }

    #[test]
    fn test_lag_clears_the_affected_cache() {
        let cache = l1("character");
        cache.put("a", "1".to_string());
        cache.put("b", "2".to_string());
        let subscriber = subscriber_with("node-a", Arc::clone(&cache));

        assert_eq!(subscriber.on_lagged("character", 7), Disposition::Cleared);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), None);
        assert_eq!(subscriber.on_lagged("equipment", 1), Disposition::UnknownCache);
        assert_eq!(subscriber.counters().snapshot().lagged, 2);
    }

    #[tokio::test]
    async fn test_repeated_watch_subscribes_once() {
        let channel = LocalBroadcast::new();
        let subscriber = Arc::new(InvalidationSubscriber::new(
            "node-a",
            Arc::new(channel.clone()),
            "cache:invalidation",
            LocalCacheRegistry::new(),
            Arc::new(InvalidationCounters::new()),
        ));

        tokio::join!(subscriber.watch("character"), subscriber.watch("character"));
        subscriber.watch("character").await;

        assert!(subscriber.is_watching("character"));
        assert_eq!(channel.subscriber_count(), 1);
        subscriber.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_watch() {
        let subscriber = Arc::new(subscriber_with("node-a", l1("character")));
        subscriber.watch("character").await;
        assert!(subscriber.is_watching("character"));

        subscriber.shutdown().await;
        assert!(subscriber.is_shut_down());

        subscriber.watch("equipment").await;
        assert!(!subscriber.is_watching("equipment"));
    }
}
