//! Summary, keywords, and embedding.

use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::debug;

use groundswell_common::EnrichmentUpdate;

use crate::llm::LlmError;
use crate::pipeline::PipelineDeps;
use crate::stage::{Stage, StageOutcome};
use crate::state::{PipelineState, SemanticOutcome};

#[derive(Debug, Deserialize, JsonSchema)]
struct SemanticLlmVerdict {
    /// 1-3 sentence summary of the problem.
    summary: String,
    keywords: Vec<String>,
}

pub struct SemanticAnalysis;

/// Models sometimes return one comma-joined string instead of an array
/// element per keyword; split those apart.
fn normalize_keywords(keywords: Vec<String>) -> Vec<String> {
    keywords
        .into_iter()
        .flat_map(|k| {
            k.split(',')
                .map(|part| part.trim().to_string())
                .collect::<Vec<_>>()
        })
        .filter(|k| !k.is_empty())
        .collect()
}

fn fallback_summary(content: &str) -> String {
    let mut end = content.len().min(280);
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    content[..end].to_string()
}

#[async_trait]
impl Stage for SemanticAnalysis {
    fn name(&self) -> &'static str {
        "semantic_analysis"
    }

    async fn run(&self, deps: &PipelineDeps, state: &mut PipelineState) -> Result<StageOutcome> {
        let content = state.raw.content();

        let system = "Summarize the forum post in 1-3 sentences focused on the problem \
                      being described, and extract 3-8 short keywords.";
        let user = content.clone();

        let (summary, keywords, mut tokens) = match deps
            .llm
            .structured::<SemanticLlmVerdict>(system, &user)
            .await
        {
            Ok((llm, tokens)) => (llm.summary, normalize_keywords(llm.keywords), tokens),
            Err(LlmError::Parse(e)) | Err(LlmError::Transport(e)) => {
                debug!(post_id = state.post_id(), error = e.as_str(), "Semantic summary defaulted");
                (fallback_summary(&content), Vec::new(), 0)
            }
            Err(LlmError::Cancelled) => anyhow::bail!("cancelled"),
        };

        // The embedding comes from the dedicated endpoint; without it the
        // cluster stage cannot run, so its absence is a stage failure.
        let embedding = match deps.llm.embed(&content).await {
            Ok(embedding) => embedding,
            Err(LlmError::Cancelled) => anyhow::bail!("cancelled"),
            Err(e) => {
                return Ok(StageOutcome::failed_with_tokens(
                    format!("embedding failed: {e}"),
                    tokens,
                ));
            }
        };
        tokens += (content.len() / 4) as u32;

        deps.posts
            .apply_update(
                state.post_id(),
                &EnrichmentUpdate {
                    summary: Some(summary.clone()),
                    keywords: Some(keywords.clone()),
                    embedding: Some(embedding.clone()),
                    ..Default::default()
                },
            )
            .await?;

        let output = serde_json::json!({
            "summary": summary,
            "keywords": keywords,
            "embedding_dim": embedding.len(),
        });
        state.semantic = Some(SemanticOutcome {
            summary,
            keywords,
            embedding,
        });
        Ok(StageOutcome::ok_with(output, tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comma_joined_keywords_are_split() {
        let keywords = normalize_keywords(vec!["faucet, plumbing,leak".to_string()]);
        assert_eq!(keywords, vec!["faucet", "plumbing", "leak"]);
    }

    #[test]
    fn already_split_keywords_pass_through() {
        let keywords =
            normalize_keywords(vec!["faucet".to_string(), "plumbing".to_string()]);
        assert_eq!(keywords, vec!["faucet", "plumbing"]);
    }

    #[test]
    fn empty_fragments_are_dropped() {
        let keywords = normalize_keywords(vec![" , faucet,,".to_string()]);
        assert_eq!(keywords, vec!["faucet"]);
    }

    #[test]
    fn fallback_summary_truncates_on_char_boundary() {
        let text = "é".repeat(300);
        let summary = fallback_summary(&text);
        assert!(summary.len() <= 280);
        assert!(text.starts_with(&summary));
    }
}
