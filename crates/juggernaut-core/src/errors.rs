use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A failed chat-completion call. Each variant maps to a recovery [`ErrorCategory`] and
/// to the error code reported to clients.
#[derive(Clone, Debug, thiserror::Error)]
pub enum LlmError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The provider panicked while opening or reading the stream.
    #[error("provider panicked: {0}")]
    ProviderPanicked(String),

    #[error("cancelled")]
    Cancelled,
}

/// Failure classes keyed by the recovery-strategy table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    RateLimit,
    ModelError,
    Timeout,
    ToolError,
    AuthError,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::ModelError => "model_error",
            Self::Timeout => "timeout",
            Self::ToolError => "tool_error",
            Self::AuthError => "auth_error",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LlmError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthenticationFailed(_) | Self::Cancelled)
    }

    pub fn suggested_delay(&self) -> Option<Duration> {
        if let Self::RateLimited { retry_after } = self {
            *retry_after
        } else {
            None
        }
    }

    /// Recovery category for the strategy table.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Timeout(_) | Self::StreamInterrupted(_) => ErrorCategory::Timeout,
            Self::ModelUnavailable(_) | Self::MalformedResponse(_) => ErrorCategory::ModelError,
            Self::AuthenticationFailed(_) => ErrorCategory::AuthError,
            Self::ServerError { status, .. } if *status == 503 || *status == 529 => {
                ErrorCategory::ModelError
            }
            Self::ServerError { .. }
            | Self::NetworkError(_)
            | Self::InvalidRequest(_)
            | Self::ProviderPanicked(_)
            | Self::Cancelled => ErrorCategory::Unknown,
        }
    }

    /// Taxonomy code surfaced to callers in `error` events and stop reasons.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "LLM_RATE_LIMIT",
            Self::Timeout(_) | Self::StreamInterrupted(_) => "LLM_TIMEOUT",
            Self::AuthenticationFailed(_) => "LLM_AUTH",
            Self::MalformedResponse(_) => "LLM_MALFORMED_RESPONSE",
            Self::Cancelled => "CANCELLED",
            Self::InvalidRequest(_)
            | Self::ServerError { .. }
            | Self::NetworkError(_)
            | Self::ModelUnavailable(_)
            | Self::ProviderPanicked(_) => "LLM_ERROR",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String, retry_after: Option<Duration>) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            404 => Self::ModelUnavailable(body),
            408 | 504 => Self::Timeout(Duration::ZERO),
            429 => Self::RateLimited { retry_after },
            400 | 413 | 422 => Self::InvalidRequest(body),
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_is_fatal() {
        assert!(LlmError::AuthenticationFailed("bad key".into()).is_fatal());
        assert!(!LlmError::RateLimited { retry_after: None }.is_fatal());
    }

    #[test]
    fn categories_follow_strategy_table() {
        assert_eq!(LlmError::RateLimited { retry_after: None }.category(), ErrorCategory::RateLimit);
        assert_eq!(LlmError::Timeout(Duration::ZERO).category(), ErrorCategory::Timeout);
        assert_eq!(LlmError::ModelUnavailable("m".into()).category(), ErrorCategory::ModelError);
        assert_eq!(LlmError::MalformedResponse("x".into()).category(), ErrorCategory::ModelError);
        assert_eq!(LlmError::AuthenticationFailed("x".into()).category(), ErrorCategory::AuthError);
        assert_eq!(
            LlmError::ServerError { status: 503, body: String::new() }.category(),
            ErrorCategory::ModelError
        );
        assert_eq!(
            LlmError::ServerError { status: 500, body: String::new() }.category(),
            ErrorCategory::Unknown
        );
    }

    #[test]
    fn taxonomy_codes() {
        assert_eq!(LlmError::RateLimited { retry_after: None }.code(), "LLM_RATE_LIMIT");
        assert_eq!(LlmError::Timeout(Duration::ZERO).code(), "LLM_TIMEOUT");
        assert_eq!(LlmError::AuthenticationFailed("x".into()).code(), "LLM_AUTH");
        assert_eq!(LlmError::ProviderPanicked("boom".into()).code(), "LLM_ERROR");
        assert_eq!(LlmError::MalformedResponse("x".into()).code(), "LLM_MALFORMED_RESPONSE");
    }

    #[test]
    fn from_status_mapping() {
        assert!(LlmError::from_status(401, "unauthorized".into(), None).is_fatal());
        assert!(LlmError::from_status(403, "forbidden".into(), None).is_fatal());
        assert!(matches!(
            LlmError::from_status(429, "slow down".into(), Some(Duration::from_secs(7))),
            LlmError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(7)
        ));
        assert!(matches!(LlmError::from_status(404, "no such model".into(), None), LlmError::ModelUnavailable(_)));
        assert!(matches!(LlmError::from_status(504, String::new(), None), LlmError::Timeout(_)));
        assert!(matches!(LlmError::from_status(502, "bad gateway".into(), None), LlmError::ServerError { status: 502, .. }));
        assert!(matches!(LlmError::from_status(400, "bad".into(), None), LlmError::InvalidRequest(_)));
    }

    #[test]
    fn suggested_delay_only_for_rate_limit() {
        let rl = LlmError::RateLimited { retry_after: Some(Duration::from_secs(5)) };
        assert_eq!(rl.suggested_delay(), Some(Duration::from_secs(5)));
        assert_eq!(LlmError::Timeout(Duration::ZERO).suggested_delay(), None);
    }
}
