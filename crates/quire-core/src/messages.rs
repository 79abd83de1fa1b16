use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, SessionContext};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Numeric code used by the REST layer (`1` user, `2` assistant).
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::User),
            2 => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// Generation status of a message. `Success` and `Failed` are terminal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Continuing,
    #[default]
    Success,
    Failed,
}

impl MessageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

/// A document the assistant referenced while answering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelDoc {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub space_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource: String,
}

/// Supplementary data attached to a finished message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageExt {
    #[serde(default)]
    pub rel_docs: Vec<RelDoc>,
}

/// One entry in the visible transcript.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub key: MessageId,
    pub text: String,
    pub role: Role,
    pub status: MessageStatus,
    pub sequence: i64,
    pub context: SessionContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<MessageExt>,
}

impl Message {
    /// Empty assistant message awaiting streamed fragments.
    pub fn assistant_pending(key: MessageId, sequence: i64, context: SessionContext) -> Self {
        Self {
            key,
            text: String::new(),
            role: Role::Assistant,
            status: MessageStatus::Continuing,
            sequence,
            context,
            ext: None,
        }
    }

    /// User messages are complete the moment they exist.
    pub fn user(key: MessageId, text: impl Into<String>, sequence: i64, context: SessionContext) -> Self {
        Self {
            key,
            text: text.into(),
            role: Role::User,
            status: MessageStatus::Success,
            sequence,
            context,
            ext: None,
        }
    }

    /// Length in characters; stream offsets are expressed in the same unit.
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SessionContext {
        SessionContext::new("sp", "s")
    }

    #[test]
    fn pending_assistant_message() {
        let msg = Message::assistant_pending(MessageId::from("m1"), 5, ctx());
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.status, MessageStatus::Continuing);
        assert!(msg.is_empty());
        assert!(!msg.is_terminal());
    }

    #[test]
    fn user_message_is_terminal() {
        let msg = Message::user(MessageId::new(), "hi", 1, ctx());
        assert_eq!(msg.status, MessageStatus::Success);
        assert!(msg.is_terminal());
    }

    #[test]
    fn len_counts_characters_not_bytes() {
        let mut msg = Message::assistant_pending(MessageId::from("m1"), 1, ctx());
        msg.text.push_str("héllo 世界");
        assert_eq!(msg.len(), 8);
        assert!(msg.text.len() > 8);
    }

    #[test]
    fn role_codes() {
        assert_eq!(Role::from_code(1), Some(Role::User));
        assert_eq!(Role::from_code(2), Some(Role::Assistant));
        assert_eq!(Role::from_code(9), None);
    }

    #[test]
    fn status_serialization() {
        assert_eq!(serde_json::to_string(&MessageStatus::Continuing).unwrap(), r#""continuing""#);
        assert_eq!(serde_json::to_string(&MessageStatus::Failed).unwrap(), r#""failed""#);
        assert!(MessageStatus::Success.is_terminal());
        assert!(!MessageStatus::Continuing.is_terminal());
    }
}
