//! Rate-gated, retrying front door to the LLM.
//!
//! Every stage call goes through both the requests/minute and tokens/minute
//! buckets. Transient provider errors retry with exponential backoff; a
//! malformed response is returned as `Parse` so the stage can fall back to
//! its defaults without burning retries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ai_client::{ChatService, EmbeddingService, StructuredOutput};
use tracing::warn;

use groundswell_common::{RateGate, EMBEDDING_DIM};

/// Rough request-token estimate used to debit the tokens bucket before the
/// provider reports actual usage.
const OUTPUT_TOKEN_HEADROOM: u32 = 500;

#[derive(Debug)]
pub enum LlmError {
    Cancelled,
    /// Transport / provider failure after retries.
    Transport(String),
    /// Response arrived but did not decode into the expected shape.
    Parse(String),
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::Cancelled => write!(f, "cancelled"),
            LlmError::Transport(e) => write!(f, "transport: {e}"),
            LlmError::Parse(e) => write!(f, "parse: {e}"),
        }
    }
}

pub struct LlmGate {
    chat: Arc<dyn ChatService>,
    embedder: Arc<dyn EmbeddingService>,
    requests: RateGate,
    tokens: RateGate,
    retry_attempts: u32,
    retry_delay: Duration,
    cancel: Arc<AtomicBool>,
}

impl LlmGate {
    pub fn new(
        chat: Arc<dyn ChatService>,
        embedder: Arc<dyn EmbeddingService>,
        requests_per_minute: u32,
        tokens_per_minute: u32,
        retry_attempts: u32,
        retry_delay: Duration,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            chat,
            embedder,
            requests: RateGate::per_minute(requests_per_minute),
            tokens: RateGate::per_minute(tokens_per_minute),
            retry_attempts,
            retry_delay,
            cancel,
        }
    }

    /// Structured completion decoded into `T`. Returns the decoded value and
    /// the tokens the provider billed.
    pub async fn structured<T: StructuredOutput>(
        &self,
        system: &str,
        user: &str,
    ) -> Result<(T, u32), LlmError> {
        let estimate = estimate_tokens(&[system, user]);
        let schema_name = T::type_name();
        let schema = T::openai_schema();

        let mut attempt = 0;
        loop {
            self.acquire(estimate).await?;

            match self
                .chat
                .structured(system, user, &schema_name, schema.clone())
                .await
            {
                Ok(output) => {
                    return serde_json::from_str::<T>(&output.content)
                        .map(|value| (value, output.tokens_used))
                        .map_err(|e| LlmError::Parse(format!("{e}: {}", truncate(&output.content))));
                }
                Err(e) if e.is_transient() && attempt < self.retry_attempts => {
                    let delay = self.retry_delay * 2u32.saturating_pow(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "LLM call failed, backing off");
                    attempt += 1;
                    self.sleep(delay).await?;
                }
                Err(e) => return Err(LlmError::Transport(e.to_string())),
            }
        }
    }

    /// Embedding for one text, validated to the expected dimension.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let estimate = estimate_tokens(&[text]);

        let mut attempt = 0;
        loop {
            self.acquire(estimate).await?;

            match self.embedder.embed(text).await {
                Ok(embedding) => {
                    if embedding.len() != EMBEDDING_DIM {
                        return Err(LlmError::Parse(format!(
                            "embedding dimension {} != {EMBEDDING_DIM}",
                            embedding.len()
                        )));
                    }
                    return Ok(embedding);
                }
                Err(e) if e.is_transient() && attempt < self.retry_attempts => {
                    let delay = self.retry_delay * 2u32.saturating_pow(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Embedding failed, backing off");
                    attempt += 1;
                    self.sleep(delay).await?;
                }
                Err(e) => return Err(LlmError::Transport(e.to_string())),
            }
        }
    }

    async fn acquire(&self, token_estimate: u32) -> Result<(), LlmError> {
        self.requests
            .acquire_cancellable(1, &self.cancel)
            .await
            .map_err(|_| LlmError::Cancelled)?;
        self.tokens
            .acquire_cancellable(token_estimate, &self.cancel)
            .await
            .map_err(|_| LlmError::Cancelled)?;
        Ok(())
    }

    async fn sleep(&self, delay: Duration) -> Result<(), LlmError> {
        let mut remaining = delay;
        while !remaining.is_zero() {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(LlmError::Cancelled);
            }
            let slice = remaining.min(Duration::from_millis(100));
            tokio::time::sleep(slice).await;
            remaining = remaining.saturating_sub(slice);
        }
        Ok(())
    }
}

/// ~4 chars per token plus headroom for the response.
fn estimate_tokens(texts: &[&str]) -> u32 {
    let chars: usize = texts.iter().map(|t| t.len()).sum();
    (chars / 4) as u32 + OUTPUT_TOKEN_HEADROOM
}

fn truncate(s: &str) -> String {
    let mut end = s.len().min(200);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
