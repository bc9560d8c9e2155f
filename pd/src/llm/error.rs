//! LLM error types

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during LLM operations
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Check whether this is a rate-limit error.
    ///
    /// Providers are inconsistent: some surface a 429, some only a message.
    /// A message containing both "rate" and "limit" counts.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } => true,
            LlmError::ApiError { status, message } => {
                let m = message.to_lowercase();
                *status == 429 || (m.contains("rate") && m.contains("limit"))
            }
            _ => false,
        }
    }

    /// Check if this error is worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } => true,
            LlmError::ApiError { status, .. } => *status >= 500,
            LlmError::Network(_) => true,
            LlmError::InvalidResponse(_) => false,
            LlmError::Json(_) => false,
        }
    }

    /// Retry delay for rate-limit errors
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_by_variant() {
        let err = LlmError::RateLimited {
            retry_after: Duration::from_secs(60),
        };
        assert!(err.is_rate_limit());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_rate_limit_by_message_substring() {
        let err = LlmError::ApiError {
            status: 400,
            message: "Request rejected: rate limit exceeded for model".to_string(),
        };
        assert!(err.is_rate_limit());

        let err = LlmError::ApiError {
            status: 400,
            message: "Bad request".to_string(),
        };
        assert!(!err.is_rate_limit());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(
            LlmError::ApiError {
                status: 503,
                message: "unavailable".to_string()
            }
            .is_retryable()
        );
        assert!(
            !LlmError::ApiError {
                status: 400,
                message: "bad".to_string()
            }
            .is_retryable()
        );
        assert!(!LlmError::InvalidResponse("no json".to_string()).is_retryable());
    }
}
