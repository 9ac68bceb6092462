use thiserror::Error;

#[derive(Error, Debug)]
pub enum AiError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Empty response from provider")]
    EmptyResponse,
}

impl AiError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AiError::Api { status: 429, .. })
    }

    /// Transient errors (timeouts, 429s, 5xx) are worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            AiError::Http(e) => e.is_timeout() || e.is_connect(),
            AiError::Api { status, .. } => *status == 429 || *status >= 500,
            AiError::EmptyResponse => false,
        }
    }
}
