use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use quire_core::api::{ChatApi, HistoryPage, HistoryQuery, SendReceipt};
use quire_core::errors::ApiError;
use quire_core::ids::{MessageId, SessionContext};
use quire_core::messages::MessageExt;

use crate::wire::{HistoryResponse, SendRequest, SendResponse};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// `ChatApi` over the chat REST endpoints.
pub struct HttpChatApi {
    client: Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpChatApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            timeout,
        })
    }

    fn session_url(&self, context: &SessionContext, suffix: &str) -> String {
        format!(
            "{}/api/v1/{}/chat/{}/{}",
            self.base_url, context.space_id, context.session_id, suffix
        )
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        let req = req.header("accept", "application/json");
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn execute<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ApiError> {
        let resp = self.authorize(req).send().await.map_err(|e| self.map_transport(e))?;
        let status = resp.status();
        let body = resp.bytes().await.map_err(|e| self.map_transport(e))?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body).into_owned();
            return Err(ApiError::from_status(status.as_u16(), text));
        }
        Ok(serde_json::from_slice(&body)?)
    }

    fn map_transport(&self, e: reqwest::Error) -> ApiError {
        if e.is_timeout() {
            ApiError::Timeout(self.timeout)
        } else {
            ApiError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    #[instrument(skip(self, query), fields(session_id = %context.session_id, page = query.page))]
    async fn history(&self, context: &SessionContext, query: &HistoryQuery) -> Result<HistoryPage, ApiError> {
        let req = self.client.get(self.session_url(context, "message/list")).query(&[
            ("cursor", query.cursor.clone()),
            ("page", query.page.to_string()),
            ("pagesize", query.page_size.to_string()),
        ]);
        let resp: HistoryResponse = self.execute(req).await?;
        let page = resp.into_page(context);
        debug!(count = page.messages.len(), total = page.total, "history page fetched");
        Ok(page)
    }

    #[instrument(skip(self), fields(session_id = %context.session_id, message_id = %message_id))]
    async fn message_extensions(
        &self,
        context: &SessionContext,
        message_id: &MessageId,
    ) -> Result<MessageExt, ApiError> {
        let url = self.session_url(context, &format!("message/{message_id}/ext"));
        self.execute(self.client.get(url)).await
    }

    #[instrument(skip(self, text), fields(session_id = %context.session_id, message_id = %message_id))]
    async fn send_message(
        &self,
        context: &SessionContext,
        message_id: &MessageId,
        text: &str,
    ) -> Result<SendReceipt, ApiError> {
        let body = SendRequest {
            message_id: message_id.as_str(),
            message: text,
        };
        let req = self.client.post(self.session_url(context, "message/send")).json(&body);
        let resp: SendResponse = self.execute(req).await?;
        Ok(SendReceipt {
            sequence: resp.sequence,
        })
    }
}
