//! Sentiment scoring.

use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::debug;

use groundswell_common::{EnrichmentUpdate, SentimentLabel};

use crate::llm::LlmError;
use crate::pipeline::PipelineDeps;
use crate::stage::{Stage, StageOutcome};
use crate::state::{PipelineState, SentimentOutcome};

#[derive(Debug, Deserialize, JsonSchema)]
struct SentimentLlmVerdict {
    sentiment: SentimentLabel,
    /// -1 (very negative) to 1 (very positive).
    score: f64,
    confidence: f64,
}

pub struct SentimentAnalysis;

#[async_trait]
impl Stage for SentimentAnalysis {
    fn name(&self) -> &'static str {
        "sentiment_analysis"
    }

    async fn run(&self, deps: &PipelineDeps, state: &mut PipelineState) -> Result<StageOutcome> {
        let system = "Rate the sentiment of the forum post: positive, neutral or negative, \
                      with a score from -1 to 1 and your confidence from 0 to 1.";
        let user = format!("Title: {}\n\nBody: {}", state.raw.title, state.raw.body);

        let (outcome, tokens) = match deps
            .llm
            .structured::<SentimentLlmVerdict>(system, &user)
            .await
        {
            Ok((llm, tokens)) => (
                SentimentOutcome {
                    label: llm.sentiment,
                    score: llm.score.clamp(-1.0, 1.0),
                    confidence: llm.confidence.clamp(0.0, 1.0),
                },
                tokens,
            ),
            Err(LlmError::Parse(e)) | Err(LlmError::Transport(e)) => {
                debug!(post_id = state.post_id(), error = e.as_str(), "Sentiment defaulted");
                (
                    SentimentOutcome {
                        label: SentimentLabel::Neutral,
                        score: 0.0,
                        confidence: 0.5,
                    },
                    0,
                )
            }
            Err(LlmError::Cancelled) => anyhow::bail!("cancelled"),
        };

        deps.posts
            .apply_update(
                state.post_id(),
                &EnrichmentUpdate {
                    sentiment_label: Some(outcome.label),
                    sentiment_score: Some(outcome.score),
                    ..Default::default()
                },
            )
            .await?;

        let output = serde_json::json!({
            "sentiment": outcome.label.as_str(),
            "score": outcome.score,
        });
        state.sentiment = Some(outcome);
        Ok(StageOutcome::ok_with(output, tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_decodes() {
        let v: SentimentLlmVerdict = serde_json::from_str(
            r#"{"sentiment": "negative", "score": -0.7, "confidence": 0.8}"#,
        )
        .unwrap();
        assert_eq!(v.sentiment, SentimentLabel::Negative);
        assert!((v.score + 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn out_of_range_scores_clamp() {
        assert_eq!(5.0f64.clamp(-1.0, 1.0), 1.0);
        assert_eq!((-3.0f64).clamp(-1.0, 1.0), -1.0);
    }
}
