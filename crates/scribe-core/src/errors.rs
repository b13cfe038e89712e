use std::time::Duration;

/// Typed error hierarchy for model endpoint calls.
/// Classifies errors as fatal (don't retry), retryable, or operational.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    // Fatal, never retried
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("context window exceeded: {actual} > {limit}")]
    ContextWindowExceeded { limit: usize, actual: usize },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("malformed reply: {0}")]
    MalformedReply(String),

    // Retryable
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // Operational
    #[error("circuit open, endpoint unavailable for {0:?}")]
    CircuitOpen(Duration),
    #[error("cancelled")]
    Cancelled,
}

impl GatewayError {
    /// Whether another attempt against the same endpoint may succeed.
    /// A stalled endpoint is indistinguishable from a slow one, so timeouts retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ServerError { .. }
                | Self::NetworkError(_)
                | Self::StreamInterrupted(_)
                | Self::Timeout(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed(_)
                | Self::ContextWindowExceeded { .. }
                | Self::InvalidRequest(_)
                | Self::MalformedReply(_)
        )
    }

    pub fn suggested_delay(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            Self::CircuitOpen(remaining) => Some(*remaining),
            _ => None,
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::ContextWindowExceeded { .. } => "context_window_exceeded",
            Self::InvalidRequest(_) => "invalid_request",
            Self::MalformedReply(_) => "malformed_reply",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::NetworkError(_) => "network_error",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::Timeout(_) => "timeout",
            Self::CircuitOpen(_) => "circuit_open",
            Self::Cancelled => "cancelled",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            400 | 404 | 422 => Self::InvalidRequest(body),
            408 => Self::Timeout(Duration::ZERO),
            429 => Self::RateLimited { retry_after: None },
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_failures_are_retryable() {
        assert!(GatewayError::RateLimited { retry_after: None }.is_retryable());
        assert!(GatewayError::ServerError { status: 503, body: "busy".into() }.is_retryable());
        assert!(GatewayError::NetworkError("reset".into()).is_retryable());
        assert!(GatewayError::StreamInterrupted("eof".into()).is_retryable());
        assert!(GatewayError::Timeout(Duration::from_secs(300)).is_retryable());
    }

    #[test]
    fn request_problems_are_fatal() {
        assert!(GatewayError::AuthenticationFailed("bad key".into()).is_fatal());
        assert!(GatewayError::InvalidRequest("bad".into()).is_fatal());
        assert!(GatewayError::MalformedReply("not json".into()).is_fatal());
        assert!(!GatewayError::Timeout(Duration::from_secs(1)).is_fatal());
    }

    #[test]
    fn cancellation_is_neither() {
        let cancelled = GatewayError::Cancelled;
        assert!(!cancelled.is_retryable());
        assert!(!cancelled.is_fatal());
    }

    #[test]
    fn circuit_open_suggests_remaining_cooldown() {
        let err = GatewayError::CircuitOpen(Duration::from_secs(12));
        assert_eq!(err.suggested_delay(), Some(Duration::from_secs(12)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn from_status_mapping() {
        assert!(GatewayError::from_status(401, "unauthorized".into()).is_fatal());
        assert!(GatewayError::from_status(422, "schema".into()).is_fatal());
        assert!(GatewayError::from_status(408, "slow".into()).is_retryable());
        assert!(GatewayError::from_status(429, "slow down".into()).is_retryable());
        assert!(GatewayError::from_status(502, "bad gateway".into()).is_retryable());
        assert_eq!(GatewayError::from_status(418, "teapot".into()).error_kind(), "invalid_request");
    }
}
