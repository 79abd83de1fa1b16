use async_trait::async_trait;

use crate::errors::ApiError;
use crate::ids::{MessageId, SessionContext};
use crate::messages::{Message, MessageExt};

/// Parameters for one page of message history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Opaque pagination cursor; empty for the newest page.
    pub cursor: String,
    /// 1-based page number.
    pub page: u32,
    pub page_size: u32,
}

impl HistoryQuery {
    /// First (newest) page, the one a resynchronization loads.
    pub fn first_page(page_size: u32) -> Self {
        Self::page(1, page_size)
    }

    pub fn page(page: u32, page_size: u32) -> Self {
        Self {
            cursor: String::new(),
            page: page.max(1),
            page_size,
        }
    }
}

/// A page of authoritative history, ordered by sequence ascending.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HistoryPage {
    pub messages: Vec<Message>,
    pub total: u64,
}

/// Response to a sent user message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SendReceipt {
    pub sequence: i64,
}

/// REST surface the engine depends on.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn history(&self, context: &SessionContext, query: &HistoryQuery) -> Result<HistoryPage, ApiError>;

    async fn message_extensions(
        &self,
        context: &SessionContext,
        message_id: &MessageId,
    ) -> Result<MessageExt, ApiError>;

    async fn send_message(
        &self,
        context: &SessionContext,
        message_id: &MessageId,
        text: &str,
    ) -> Result<SendReceipt, ApiError>;
}
