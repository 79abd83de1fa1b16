use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const DEFAULT_BUFFER: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },
}

/// Cancels a topic subscription. Idempotent.
#[derive(Clone, Debug)]
pub struct UnsubscribeHandle(CancellationToken);

impl UnsubscribeHandle {
    pub fn new(token: CancellationToken) -> Self {
        Self(token)
    }

    pub fn unsubscribe(&self) {
        self.0.cancel();
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// Live payloads for one topic plus the handle that stops them.
pub struct Subscription {
    pub topic: String,
    pub payloads: mpsc::Receiver<Bytes>,
    pub handle: UnsubscribeHandle,
}

/// Pub/sub client delivering raw payloads to topic subscribers.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError>;
}

struct Subscriber {
    tx: mpsc::Sender<Bytes>,
    token: CancellationToken,
}

/// In-process transport: `publish` fans out to every live subscriber of a topic.
pub struct MemoryTransport {
    topics: DashMap<String, Vec<Subscriber>>,
    buffer: usize,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl MemoryTransport {
    pub fn new(buffer: usize) -> Self {
        Self {
            topics: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    /// Deliver `payload` to the topic's subscribers. Returns how many received it.
    pub fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> usize {
        let payload = payload.into();
        let Some(mut subscribers) = self.topics.get_mut(topic) else {
            return 0;
        };
        subscribers.retain(|s| !s.token.is_cancelled() && !s.tx.is_closed());

        let mut delivered = 0;
        for sub in subscribers.iter() {
            match sub.tx.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(topic, "subscriber queue full, dropping payload");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    /// Number of live subscribers on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|subs| subs.iter().filter(|s| !s.token.is_cancelled() && !s.tx.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let token = CancellationToken::new();
        self.topics.entry(topic.to_string()).or_default().push(Subscriber {
            tx,
            token: token.clone(),
        });
        tracing::debug!(topic, "subscribed");
        Ok(Subscription {
            topic: topic.to_string(),
            payloads: rx,
            handle: UnsubscribeHandle::new(token),
        })
    }
}
