use thiserror::Error;

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("http error{}: {message}", .status.map(|s| format!(" {s}")).unwrap_or_default())]
    Http {
        status: Option<u16>,
        message: String,
    },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl BenchError {
    /// Rate limiting, gateway hiccups and transport failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status: None, .. } => true,
            Self::Http {
                status: Some(code), ..
            } => matches!(code, 429 | 502 | 503 | 504),
            _ => false,
        }
    }
}

pub type BenchResult<T> = Result<T, BenchError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: Option<u16>) -> BenchError {
        BenchError::Http {
            status,
            message: "boom".into(),
        }
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(http(Some(429)).is_retryable());
        assert!(http(Some(503)).is_retryable());
        assert!(http(None).is_retryable());
        assert!(!http(Some(400)).is_retryable());
        assert!(!http(Some(500)).is_retryable());
        assert!(!BenchError::Config("x".into()).is_retryable());
    }

    #[test]
    fn test_http_display() {
        assert_eq!(http(Some(429)).to_string(), "http error 429: boom");
        assert_eq!(http(None).to_string(), "http error: boom");
    }
}
