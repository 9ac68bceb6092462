mod client;
pub(crate) mod types;

use async_trait::async_trait;

use crate::error::AiError;
use crate::traits::{ChatOutput, ChatService, EmbeddingService};
use client::OpenAiClient;

/// OpenAI-backed chat + embedding client.
#[derive(Clone)]
pub struct OpenAi {
    api_key: String,
    chat_model: String,
    embedding_model: String,
    base_url: Option<String>,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>, chat_model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            chat_model: chat_model.into(),
            embedding_model: "text-embedding-3-small".to_string(),
            base_url: None,
        }
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn chat_model(&self) -> &str {
        &self.chat_model
    }

    fn client(&self) -> OpenAiClient {
        let client = OpenAiClient::new(&self.api_key);
        match &self.base_url {
            Some(url) => client.with_base_url(url),
            None => client,
        }
    }

    fn extract_output(response: types::ChatResponse) -> Result<ChatOutput, AiError> {
        let tokens_used = response.usage.as_ref().map(|u| u.total_tokens).unwrap_or(0);
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|content| ChatOutput {
                content,
                tokens_used,
            })
            .ok_or(AiError::EmptyResponse)
    }
}

#[async_trait]
impl ChatService for OpenAi {
    async fn chat(&self, system: &str, user: &str) -> Result<ChatOutput, AiError> {
        let request = types::ChatRequest {
            model: self.chat_model.clone(),
            messages: vec![
                types::WireMessage::system(system),
                types::WireMessage::user(user),
            ],
            temperature: Some(0.0),
            max_tokens: Some(4096),
            response_format: None,
        };

        let response = self.client().chat(&request).await?;
        Self::extract_output(response)
    }

    async fn structured(
        &self,
        system: &str,
        user: &str,
        schema_name: &str,
        schema: serde_json::Value,
    ) -> Result<ChatOutput, AiError> {
        let request = types::ChatRequest {
            model: self.chat_model.clone(),
            messages: vec![
                types::WireMessage::system(system),
                types::WireMessage::user(user),
            ],
            temperature: Some(0.0),
            max_tokens: None,
            response_format: Some(types::ResponseFormat {
                format_type: "json_schema",
                json_schema: types::JsonSchemaFormat {
                    name: schema_name.to_string(),
                    strict: true,
                    schema,
                },
            }),
        };

        let response = self.client().chat(&request).await?;
        Self::extract_output(response)
    }
}

#[async_trait]
impl EmbeddingService for OpenAi {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AiError> {
        let response = self
            .client()
            .embed(
                &self.embedding_model,
                serde_json::Value::String(text.to_string()),
            )
            .await?;

        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or(AiError::EmptyResponse)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AiError> {
        let input = serde_json::Value::Array(
            texts
                .iter()
                .map(|t| serde_json::Value::String(t.clone()))
                .collect(),
        );

        let response = self.client().embed(&self.embedding_model, input).await?;
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let ai = OpenAi::new("sk-test", "gpt-4o-mini");
        assert_eq!(ai.chat_model(), "gpt-4o-mini");
        assert_eq!(ai.embedding_model, "text-embedding-3-small");
    }

    #[test]
    fn builder_overrides() {
        let ai = OpenAi::new("sk-test", "gpt-4o-mini")
            .with_embedding_model("text-embedding-3-large")
            .with_base_url("http://localhost:8089/v1");
        assert_eq!(ai.embedding_model, "text-embedding-3-large");
        assert_eq!(ai.base_url.as_deref(), Some("http://localhost:8089/v1"));
    }
}
