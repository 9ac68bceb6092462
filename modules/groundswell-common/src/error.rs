use thiserror::Error;

#[derive(Error, Debug)]
pub enum GroundswellError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Source API error: {0}")]
    SourceApi(String),

    #[error("Source API rate limited")]
    RateLimited,

    #[error("LLM output error: {0}")]
    LlmOutput(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Pipeline cancelled")]
    Cancelled,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl GroundswellError {
    /// Transient errors are worth retrying; everything else is terminal for
    /// the current attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GroundswellError::RateLimited
                | GroundswellError::SourceApi(_)
                | GroundswellError::Database(_)
        )
    }
}
