use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use quire_core::api::{ChatApi, HistoryPage, HistoryQuery, SendReceipt};
use quire_core::errors::ApiError;
use quire_core::ids::{MessageId, SessionContext};
use quire_core::messages::{Message, MessageExt};

/// In-memory `ChatApi` for deterministic tests without a server.
///
/// History is served per page number; unknown pages are empty. Failures and
/// delays are programmable and every call is counted.
#[derive(Default)]
pub struct MockChatApi {
    pages: Mutex<HashMap<u32, Vec<Message>>>,
    extensions: Mutex<HashMap<MessageId, MessageExt>>,
    history_error: Mutex<Option<ApiError>>,
    send_error: Mutex<Option<ApiError>>,
    history_delay: Mutex<Option<Duration>>,
    history_calls: Mutex<Vec<(SessionContext, HistoryQuery)>>,
    extension_calls: AtomicUsize,
    sent: Mutex<Vec<(MessageId, String)>>,
    next_sequence: AtomicI64,
}

impl MockChatApi {
    pub fn new() -> Self {
        Self {
            next_sequence: AtomicI64::new(1),
            ..Default::default()
        }
    }

    /// Serve `messages` as history page `page`.
    pub fn set_page(&self, page: u32, messages: Vec<Message>) {
        self.pages.lock().insert(page, messages);
    }

    pub fn set_extensions(&self, message_id: MessageId, ext: MessageExt) {
        self.extensions.lock().insert(message_id, ext);
    }

    /// Every history call fails with `error` until cleared with `None`.
    pub fn fail_history(&self, error: Option<ApiError>) {
        *self.history_error.lock() = error;
    }

    /// The next send fails with `error`.
    pub fn fail_next_send(&self, error: ApiError) {
        *self.send_error.lock() = Some(error);
    }

    pub fn delay_history(&self, delay: Duration) {
        *self.history_delay.lock() = Some(delay);
    }

    /// Sequence returned by the next successful send.
    pub fn set_next_sequence(&self, sequence: i64) {
        self.next_sequence.store(sequence, Ordering::Relaxed);
    }

    pub fn history_calls(&self) -> Vec<(SessionContext, HistoryQuery)> {
        self.history_calls.lock().clone()
    }

    pub fn history_call_count(&self) -> usize {
        self.history_calls.lock().len()
    }

    pub fn extension_call_count(&self) -> usize {
        self.extension_calls.load(Ordering::Relaxed)
    }

    pub fn sent(&self) -> Vec<(MessageId, String)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ChatApi for MockChatApi {
    async fn history(&self, context: &SessionContext, query: &HistoryQuery) -> Result<HistoryPage, ApiError> {
        self.history_calls.lock().push((context.clone(), query.clone()));

        let delay = *self.history_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.history_error.lock().clone() {
            return Err(err);
        }

        let messages: Vec<Message> = self
            .pages
            .lock()
            .get(&query.page)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|mut m| {
                m.context = context.clone();
                m
            })
            .collect();
        let total = self.pages.lock().values().map(|p| p.len() as u64).sum();
        Ok(HistoryPage { messages, total })
    }

    async fn message_extensions(
        &self,
        _context: &SessionContext,
        message_id: &MessageId,
    ) -> Result<MessageExt, ApiError> {
        self.extension_calls.fetch_add(1, Ordering::Relaxed);
        self.extensions
            .lock()
            .get(message_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("no extensions for {message_id}")))
    }

    async fn send_message(
        &self,
        _context: &SessionContext,
        message_id: &MessageId,
        text: &str,
    ) -> Result<SendReceipt, ApiError> {
        if let Some(err) = self.send_error.lock().take() {
            return Err(err);
        }
        self.sent.lock().push((message_id.clone(), text.to_string()));
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        Ok(SendReceipt { sequence })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SessionContext {
        SessionContext::new("sp", "s")
    }

    #[tokio::test]
    async fn serves_configured_page() {
        let api = MockChatApi::new();
        api.set_page(1, vec![Message::user(MessageId::from("u1"), "hi", 1, SessionContext::new("x", "y"))]);

        let page = api.history(&ctx(), &HistoryQuery::first_page(20)).await.unwrap();
        assert_eq!(page.messages.len(), 1);
        assert_eq!(page.messages[0].context, ctx());
        assert_eq!(api.history_call_count(), 1);

        let empty = api.history(&ctx(), &HistoryQuery::page(2, 20)).await.unwrap();
        assert!(empty.messages.is_empty());
    }

    #[tokio::test]
    async fn history_failure_is_sticky() {
        let api = MockChatApi::new();
        api.fail_history(Some(ApiError::Network("down".into())));
        assert!(api.history(&ctx(), &HistoryQuery::first_page(20)).await.is_err());
        assert!(api.history(&ctx(), &HistoryQuery::first_page(20)).await.is_err());
        api.fail_history(None);
        assert!(api.history(&ctx(), &HistoryQuery::first_page(20)).await.is_ok());
    }

    #[tokio::test]
    async fn send_failure_is_one_shot() {
        let api = MockChatApi::new();
        api.set_next_sequence(10);
        api.fail_next_send(ApiError::RateLimited);
        assert!(api.send_message(&ctx(), &MessageId::from("u1"), "a").await.is_err());
        let receipt = api.send_message(&ctx(), &MessageId::from("u2"), "b").await.unwrap();
        assert_eq!(receipt.sequence, 10);
        assert_eq!(api.sent().len(), 1);
    }

    #[tokio::test]
    async fn missing_extensions_is_not_found() {
        let api = MockChatApi::new();
        let err = api.message_extensions(&ctx(), &MessageId::from("m")).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        assert_eq!(api.extension_call_count(), 1);
    }
}
