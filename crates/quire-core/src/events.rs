use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, SessionContext};

/// Subjects on the session channel that carry message stream updates.
pub const SUBJECT_ON_MESSAGE: &str = "on_message";
pub const SUBJECT_ON_MESSAGE_INIT: &str = "on_message_init";

/// Type codes carried in the `type` field of a live payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum EventCode {
    Init = 1,
    Continue = 2,
    Done = 3,
    Failed = 4,
}

impl EventCode {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Init),
            2 => Some(Self::Continue),
            3 => Some(Self::Done),
            4 => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Raw payload as delivered on `/chat_session/{session_id}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WirePayload {
    pub subject: String,
    #[serde(rename = "type")]
    pub kind: u8,
    pub data: WireData,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WireData {
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One step of an assistant reply's incremental delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    Init {
        message_id: MessageId,
        sequence: i64,
        context: SessionContext,
    },
    Continue {
        message_id: MessageId,
        offset: usize,
        fragment: String,
    },
    Done {
        message_id: MessageId,
        offset: usize,
    },
    Failed {
        message_id: MessageId,
    },
}

impl StreamEvent {
    pub fn message_id(&self) -> &MessageId {
        match self {
            Self::Init { message_id, .. }
            | Self::Continue { message_id, .. }
            | Self::Done { message_id, .. }
            | Self::Failed { message_id } => message_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Continue { .. } => "continue",
            Self::Done { .. } => "done",
            Self::Failed { .. } => "failed",
        }
    }

    /// Offset the event asserts the message text has reached, if any.
    pub fn offset(&self) -> Option<usize> {
        match self {
            Self::Continue { offset, .. } | Self::Done { offset, .. } => Some(*offset),
            Self::Init { .. } | Self::Failed { .. } => None,
        }
    }
}

/// A stream event together with the session it was received under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedEvent {
    pub context: SessionContext,
    pub event: StreamEvent,
}

impl QueuedEvent {
    pub fn new(context: SessionContext, event: StreamEvent) -> Self {
        Self { context, event }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_codes() {
        assert_eq!(EventCode::from_code(1), Some(EventCode::Init));
        assert_eq!(EventCode::from_code(4), Some(EventCode::Failed));
        assert_eq!(EventCode::from_code(0), None);
        assert_eq!(EventCode::Done as u8, 3);
    }

    #[test]
    fn payload_parses_minimal_data() {
        let raw = r#"{"subject":"on_message","type":4,"data":{"message_id":"m3"}}"#;
        let payload: WirePayload = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.kind, 4);
        assert_eq!(payload.data.message_id, "m3");
        assert!(payload.data.start_at.is_none());
    }

    #[test]
    fn payload_parses_continue() {
        let raw = r#"{"subject":"on_message","type":2,
            "data":{"message_id":"m1","start_at":3,"message":"lo","session_id":"s1"}}"#;
        let payload: WirePayload = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.data.start_at, Some(3));
        assert_eq!(payload.data.message.as_deref(), Some("lo"));
        assert_eq!(payload.data.session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn offset_only_on_positional_events() {
        let id = MessageId::from("m1");
        let cont = StreamEvent::Continue { message_id: id.clone(), offset: 3, fragment: "x".into() };
        assert_eq!(cont.offset(), Some(3));
        assert_eq!(cont.event_type(), "continue");
        let failed = StreamEvent::Failed { message_id: id.clone() };
        assert_eq!(failed.offset(), None);
        assert_eq!(failed.message_id(), &id);
    }
}
