//! Topic-based publish/subscribe transport for invalidation events.
//!
//! Delivery is fire-and-forget: a published message reaches whichever
//! subscribers are connected at that moment, including the publisher's own
//! subscription if it listens on the same topic.

mod local;
mod redis;

pub use local::LocalBroadcast;
pub use self::redis::RedisBroadcast;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::BroadcastError;

/// Stream of raw payloads received on one topic.
///
/// The stream ends (or yields an error) when the underlying connection is
/// lost; callers re-subscribe to resume.
pub type MessageStream = BoxStream<'static, Result<String, BroadcastError>>;

#[async_trait]
pub trait BroadcastChannel: Send + Sync {
    /// Publish `payload` on `topic`, returning how many receivers the
    /// transport handed it to.
    async fn publish(&self, topic: &str, payload: &str) -> Result<usize, BroadcastError>;

    async fn subscribe(&self, topic: &str) -> Result<MessageStream, BroadcastError>;

    fn backend_name(&self) -> &'static str;
}

/// Topic carrying invalidation events of one cache.
#[inline]
pub fn topic_for(prefix: &str, cache: &str) -> String {
    format!("{prefix}:{cache}")
}
