//! In-process broadcast transport over a tokio broadcast channel.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use super::{BroadcastChannel, MessageStream};
use crate::error::BroadcastError;

/// Default buffer size for the broadcast channel.
/// Receivers that fall further behind than this skip the oldest messages and
/// see a [`BroadcastError::Lagged`] in their stream.
const DEFAULT_BUFFER_SIZE: usize = 1024;

#[derive(Debug, Clone)]
struct Envelope {
    topic: Arc<str>,
    payload: String,
}

/// Broadcast transport confined to one process.
///
/// Clones share one channel, so tiered caches built over clones of the same
/// `LocalBroadcast` behave like instances connected to one Redis.
#[derive(Clone)]
pub struct LocalBroadcast {
    sender: broadcast::Sender<Envelope>,
}

impl LocalBroadcast {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Number of open subscriptions across all topics.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LocalBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BroadcastChannel for LocalBroadcast {
    async fn publish(&self, topic: &str, payload: &str) -> Result<usize, BroadcastError> {
        let envelope = Envelope {
            topic: Arc::from(topic),
            payload: payload.to_string(),
        };
        Ok(self.sender.send(envelope).unwrap_or_default())
    }

    async fn subscribe(&self, topic: &str) -> Result<MessageStream, BroadcastError> {
        let topic: Arc<str> = Arc::from(topic);
        let stream = BroadcastStream::new(self.sender.subscribe()).filter_map(move |item| {
            let topic = Arc::clone(&topic);
            async move {
                match item {
                    Ok(envelope) if envelope.topic == topic => Some(Ok(envelope.payload)),
                    Ok(_) => None,
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        tracing::warn!(topic = %topic, missed = n, "broadcast subscriber lagged, missed messages");
                        Some(Err(BroadcastError::Lagged(n)))
                    }
                }
            }
        });
        Ok(stream.boxed())
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
