use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;

use quire_core::events::{
    EventCode, QueuedEvent, StreamEvent, WirePayload, SUBJECT_ON_MESSAGE, SUBJECT_ON_MESSAGE_INIT,
};
use quire_core::ids::{MessageId, SessionContext, SessionId, SpaceId};

use crate::queue::OrderingQueue;

/// Turns raw session-channel payloads into queued stream events.
///
/// Only appends to the queue; never touches the message store.
pub struct EventNormalizer {
    context: SessionContext,
    queue: OrderingQueue,
    received: Arc<AtomicU64>,
}

impl EventNormalizer {
    pub fn new(context: SessionContext, queue: OrderingQueue) -> Self {
        Self {
            context,
            queue,
            received: Arc::default(),
        }
    }

    /// Count every payload taken off the channel into `counter`, including
    /// dropped ones. The count is bumped only after any resulting event is
    /// queued.
    pub fn with_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.received = counter;
        self
    }

    /// Map one payload to an event. Irrelevant or malformed payloads yield `None`.
    pub fn normalize(&self, raw: &[u8]) -> Option<QueuedEvent> {
        let payload: WirePayload = match serde_json::from_slice(raw) {
            Ok(p) => p,
            Err(e) => {
                trace!(error = %e, "dropping undecodable payload");
                return None;
            }
        };
        if payload.subject != SUBJECT_ON_MESSAGE && payload.subject != SUBJECT_ON_MESSAGE_INIT {
            trace!(subject = %payload.subject, "dropping payload with unrelated subject");
            return None;
        }
        let Some(code) = EventCode::from_code(payload.kind) else {
            trace!(kind = payload.kind, "dropping payload with unknown type");
            return None;
        };

        let data = payload.data;
        let context = SessionContext {
            space_id: data
                .space_id
                .map(SpaceId::from_raw)
                .unwrap_or_else(|| self.context.space_id.clone()),
            session_id: data
                .session_id
                .map(SessionId::from_raw)
                .unwrap_or_else(|| self.context.session_id.clone()),
        };
        let message_id = MessageId::from_raw(data.message_id);

        let event = match code {
            EventCode::Init => StreamEvent::Init {
                message_id,
                sequence: data.sequence.unwrap_or_default(),
                context: context.clone(),
            },
            EventCode::Continue => StreamEvent::Continue {
                message_id,
                offset: data.start_at.unwrap_or_default(),
                fragment: data.message.unwrap_or_default(),
            },
            EventCode::Done => StreamEvent::Done {
                message_id,
                offset: data.start_at.unwrap_or_default(),
            },
            EventCode::Failed => StreamEvent::Failed { message_id },
        };
        Some(QueuedEvent::new(context, event))
    }

    /// Consume payloads until the channel closes.
    pub async fn run(self, mut payloads: mpsc::Receiver<Bytes>) {
        while let Some(raw) = payloads.recv().await {
            if let Some(event) = self.normalize(&raw) {
                trace!(
                    message_id = %event.event.message_id(),
                    event_type = event.event.event_type(),
                    "enqueued stream event"
                );
                self.queue.enqueue(event);
            }
            self.received.fetch_add(1, Ordering::Release);
        }
        trace!(session = %self.context, "payload channel closed");
    }
}
