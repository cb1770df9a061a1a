//! Generation backend error types.

use thiserror::Error;

pub type GenResult<T> = Result<T, GenError>;

#[derive(Debug, Error)]
pub enum GenError {
    #[error("Missing credential: {0} is not set")]
    MissingCredential(&'static str),

    #[error("Backend returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Backend call timed out after {0} seconds")]
    Timeout(u64),

    #[error("Unexpected response shape: {0}")]
    BadResponse(String),

    #[error("LLM output is not valid JSON: {0}")]
    BadLlmJson(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GenError {
    pub fn bad_response(msg: impl Into<String>) -> Self {
        Self::BadResponse(msg.into())
    }

    /// Whether a retry could plausibly succeed.
    ///
    /// 5xx, timeouts and transport failures are transient; 4xx and shape
    /// errors are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            GenError::Http { status, .. } => *status >= 500,
            GenError::Transport(e) => !e.is_builder(),
            GenError::Timeout(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transience_classification() {
        assert!(GenError::Http {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(!GenError::Http {
            status: 422,
            body: String::new()
        }
        .is_transient());
        assert!(GenError::Timeout(60).is_transient());
        assert!(!GenError::bad_response("nope").is_transient());
        assert!(!GenError::MissingCredential("FAL_API_KEY").is_transient());
    }
}
