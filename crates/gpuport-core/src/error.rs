use thiserror::Error;

use crate::retry::Retryable;

/// Validation errors raised when constructing canonical records.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("field '{field}' cannot be empty or whitespace-only")]
    EmptyField { field: &'static str },

    #[error("invalid provider '{value}', expected one of: runpod")]
    InvalidProvider { value: String },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },
    #[error("field '{field}' must be greater than zero when present")]
    NonPositiveValue { field: &'static str },

    #[error("price {value} exceeds reasonable maximum ($1000/hour)")]
    UnreasonablePrice { value: f64 },
}

/// Terminal failure of a whole provider fetch. Individual malformed items
/// are skipped during normalization and never surface here.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request timed out: {0}")]
    Timeout(String),

    #[error("provider rate limit hit: {0}")]
    RateLimited(String),

    #[error("provider authentication failed: {0}")]
    Auth(String),

    #[error("provider response schema changed: {0}")]
    SchemaChanged(String),

    #[error("provider error: {0}")]
    Unknown(String),
}

impl ProviderError {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::RateLimited(_) => "rate_limited",
            Self::Auth(_) => "auth",
            Self::SchemaChanged(_) => "schema_changed",
            Self::Unknown(_) => "unknown",
        }
    }

    /// Classify an HTTP status into a provider error.
    pub fn from_status(status: u16, body_snippet: &str) -> Self {
        match status {
            401 | 403 => Self::Auth(format!("HTTP {status}: {body_snippet}")),
            429 => Self::RateLimited(format!("HTTP {status}: {body_snippet}")),
            408 | 504 => Self::Timeout(format!("HTTP {status}: {body_snippet}")),
            _ => Self::Unknown(format!("HTTP {status}: {body_snippet}")),
        }
    }
}

impl Retryable for ProviderError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::RateLimited(_) | Self::Unknown(_) => true,
            Self::Auth(_) | Self::SchemaChanged(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(ProviderError::from_status(401, ""), ProviderError::Auth(_)));
        assert!(matches!(ProviderError::from_status(429, ""), ProviderError::RateLimited(_)));
        assert!(matches!(ProviderError::from_status(504, ""), ProviderError::Timeout(_)));
        assert!(matches!(ProviderError::from_status(500, ""), ProviderError::Unknown(_)));
    }

    #[test]
    fn auth_and_schema_errors_never_retry() {
        assert!(!ProviderError::Auth(String::new()).is_retryable());
        assert!(!ProviderError::SchemaChanged(String::new()).is_retryable());
        assert!(ProviderError::Timeout(String::new()).is_retryable());
        assert!(ProviderError::RateLimited(String::new()).is_retryable());
    }
}
