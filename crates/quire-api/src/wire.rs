//! JSON shapes of the chat REST endpoints.

use serde::{Deserialize, Serialize};

use quire_core::ids::{MessageId, SessionContext};
use quire_core::messages::{Message, MessageExt, MessageStatus, Role};
use quire_core::HistoryPage;

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryResponse {
    #[serde(default)]
    pub list: Vec<HistoryEntry>,
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryEntry {
    pub meta: HistoryMeta,
    #[serde(default)]
    pub ext: Option<MessageExt>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryMeta {
    pub message_id: String,
    pub message: MessageBody,
    pub role: WireRole,
    pub sequence: i64,
    #[serde(default)]
    pub status: Option<MessageStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct MessageBody {
    #[serde(default)]
    pub text: String,
}

/// Role arrives either as a numeric code or as a name.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum WireRole {
    Code(u8),
    Name(Role),
}

impl WireRole {
    fn resolve(&self) -> Role {
        match self {
            Self::Code(code) => Role::from_code(*code).unwrap_or(Role::Assistant),
            Self::Name(role) => *role,
        }
    }
}

impl HistoryResponse {
    /// Convert into domain messages, sorted by sequence ascending.
    pub fn into_page(self, context: &SessionContext) -> HistoryPage {
        let mut messages: Vec<Message> = self
            .list
            .into_iter()
            .map(|entry| {
                let role = entry.meta.role.resolve();
                let status = match role {
                    Role::User => MessageStatus::Success,
                    Role::Assistant => entry.meta.status.unwrap_or_default(),
                };
                Message {
                    key: MessageId::from_raw(entry.meta.message_id),
                    text: entry.meta.message.text,
                    role,
                    status,
                    sequence: entry.meta.sequence,
                    context: context.clone(),
                    ext: entry.ext,
                }
            })
            .collect();
        messages.sort_by_key(|m| m.sequence);
        HistoryPage {
            messages,
            total: self.total,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SendRequest<'a> {
    pub message_id: &'a str,
    pub message: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SendResponse {
    pub sequence: i64,
}
