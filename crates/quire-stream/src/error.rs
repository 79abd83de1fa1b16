use quire_core::errors::ApiError;

use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("api error: {0}")]
    Api(#[from] ApiError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("no active session")]
    NoActiveSession,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_wraps() {
        let err: EngineError = ApiError::RateLimited.into();
        assert_eq!(err.to_string(), "api error: rate limited");
    }

    #[test]
    fn transport_error_wraps() {
        let err: EngineError = TransportError::Closed.into();
        assert!(matches!(err, EngineError::Transport(TransportError::Closed)));
    }
}
