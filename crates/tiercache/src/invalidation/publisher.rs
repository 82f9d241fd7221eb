use std::sync::Arc;

use crate::broadcast::{BroadcastChannel, topic_for};
use crate::event::InvalidationEvent;
use crate::metrics::InvalidationCounters;

/// Serializes invalidation events onto per-cache topics.
///
/// Publishing never fails from the caller's point of view: errors are logged
/// and counted, and the write path that triggered the event carries on.
pub struct InvalidationPublisher {
    channel: Arc<dyn BroadcastChannel>,
    topic_prefix: String,
    counters: Arc<InvalidationCounters>,
}

impl InvalidationPublisher {
    pub fn new(
        channel: Arc<dyn BroadcastChannel>,
        topic_prefix: impl Into<String>,
        counters: Arc<InvalidationCounters>,
    ) -> Self {
        Self {
            channel,
            topic_prefix: topic_prefix.into(),
            counters,
        }
    }

    pub fn topic_prefix(&self) -> &str {
        &self.topic_prefix
    }

    pub fn counters(&self) -> &Arc<InvalidationCounters> {
        &self.counters
    }

    /// Broadcast `event` on its cache's topic.
    ///
    /// Waits for the transport to accept the message, not for any subscriber.
    pub async fn publish(&self, event: &InvalidationEvent) {
        let payload = match event.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                self.counters.record_publish_failure();
                tracing::warn!(cache = %event.cache_name(), error = %e, "failed to serialize invalidation event");
                return;
            }
        };

        let topic = topic_for(&self.topic_prefix, event.cache_name());
        match self.channel.publish(&topic, &payload).await {
            Ok(receivers) => {
                self.counters.record_published();
                tracing::debug!(
                    cache = %event.cache_name(),
                    key = ?event.key(),
                    kind = %event.kind(),
                    receivers,
                    "published invalidation event"
                );
            }
            Err(e) => {
                self.counters.record_publish_failure();
                tracing::warn!(
                    cache = %event.cache_name(),
                    key = ?event.key(),
                    backend = self.channel.backend_name(),
                    error = %e,
                    "failed to publish invalidation event, other instances keep stale L1 until TTL"
                );
            }
        }
    }
}
