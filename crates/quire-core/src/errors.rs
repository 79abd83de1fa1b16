use std::time::Duration;

/// Errors from the REST layer (history, extensions, send).
/// Nothing here is fatal to the engine; callers decide whether to surface or log.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ApiError {
    // Request rejected
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),

    // Retryable
    #[error("rate limited")]
    RateLimited,
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // Response did not match the expected shape
    #[error("decode error: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServerError { .. } | Self::Network(_) | Self::Timeout(_)
        )
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::RateLimited => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::Network(_) => "network_error",
            Self::Timeout(_) => "timeout",
            Self::Decode(_) => "decode_error",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Unauthorized(body),
            404 => Self::NotFound(body),
            400 | 422 => Self::BadRequest(body),
            429 => Self::RateLimited,
            500..=599 => Self::ServerError { status, body },
            _ => Self::BadRequest(format!("unexpected status {status}: {body}")),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Decode(e.to_string())
    }
}
