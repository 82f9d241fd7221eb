//! Redis pub/sub transport.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use deadpool_redis::redis::{AsyncCommands, Client, RedisError};
use futures_util::StreamExt;

use super::{BroadcastChannel, MessageStream};
use crate::error::BroadcastError;

/// Publishes through the shared pool; subscribes on a dedicated connection
/// per topic, since pooled connections can't be put into SUBSCRIBE mode.
///
/// A publish that gets no reply within `timeout` fails with
/// [`BroadcastError::Publish`], so a stalled Redis never holds up a write.
#[derive(Clone)]
pub struct RedisBroadcast {
    pool: Pool,
    redis_url: String,
    timeout: Duration,
}

impl RedisBroadcast {
    /// Publishes are bounded by a 5s timeout unless [`with_timeout`](Self::with_timeout) says otherwise.
    pub fn new(pool: Pool, redis_url: impl Into<String>) -> Self {
        Self {
            pool,
            redis_url: redis_url.into(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl BroadcastChannel for RedisBroadcast {
    async fn publish(&self, topic: &str, payload: &str) -> Result<usize, BroadcastError> {
        let send = async {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|e| BroadcastError::Pool(e.to_string()))?;

            conn.publish::<_, _, usize>(topic, payload)
                .await
                .map_err(|e| BroadcastError::Publish(e.to_string()))
        };

        let receivers: usize = match tokio::time::timeout(self.timeout, send).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(BroadcastError::Publish(format!(
                    "no reply from redis within {}ms",
                    self.timeout.as_millis()
                )));
            }
        };

        tracing::debug!(topic = %topic, receivers, "published to redis");
        Ok(receivers)
    }

    async fn subscribe(&self, topic: &str) -> Result<MessageStream, BroadcastError> {
        let client = Client::open(self.redis_url.as_str())
            .map_err(|e| BroadcastError::Connection(e.to_string()))?;

        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| BroadcastError::Connection(e.to_string()))?;

        pubsub
            .subscribe(topic)
            .await
            .map_err(|e| BroadcastError::Subscribe(e.to_string()))?;

        tracing::info!(topic = %topic, "subscribed to redis channel");

        let stream = pubsub.into_on_message().map(|msg| {
            msg.get_payload::<String>()
                .map_err(|e: RedisError| BroadcastError::Message(e.to_string()))
        });
        Ok(stream.boxed())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
