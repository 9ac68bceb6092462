use async_trait::async_trait;

use crate::error::AiError;

/// A chat completion plus the total tokens the provider billed for it.
#[derive(Debug, Clone)]
pub struct ChatOutput {
    pub content: String,
    pub tokens_used: u32,
}

/// Dyn-compatible chat interface. Callers own retry and rate limiting; the
/// client performs exactly one request per call.
#[async_trait]
pub trait ChatService: Send + Sync {
    async fn chat(&self, system: &str, user: &str) -> Result<ChatOutput, AiError>;

    /// Structured-output completion constrained to `schema` (an
    /// OpenAI-compatible JSON schema, see [`crate::StructuredOutput`]).
    async fn structured(
        &self,
        system: &str,
        user: &str,
        schema_name: &str,
        schema: serde_json::Value,
    ) -> Result<ChatOutput, AiError>;
}

/// Dyn-compatible embedding interface.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AiError>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AiError>;
}
