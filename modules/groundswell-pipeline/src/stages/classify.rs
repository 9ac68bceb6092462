//! Post-type classification.

use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::debug;

use groundswell_common::{Classification, EnrichmentUpdate};

use crate::llm::LlmError;
use crate::pipeline::PipelineDeps;
use crate::stage::{Stage, StageOutcome};
use crate::state::{ClassificationOutcome, PipelineState};

#[derive(Debug, Deserialize, JsonSchema)]
struct ClassificationLlmVerdict {
    classification: Classification,
    confidence: f64,
}

pub struct Classify;

#[async_trait]
impl Stage for Classify {
    fn name(&self) -> &'static str {
        "classification"
    }

    async fn run(&self, deps: &PipelineDeps, state: &mut PipelineState) -> Result<StageOutcome> {
        let system = "Classify the forum post as one of: bug, feature_request, question, \
                      discussion, documentation, other. Report your confidence between 0 and 1.";
        let user = format!("Title: {}\n\nBody: {}", state.raw.title, state.raw.body);

        let (outcome, tokens) = match deps
            .llm
            .structured::<ClassificationLlmVerdict>(system, &user)
            .await
        {
            Ok((llm, tokens)) => (
                ClassificationOutcome {
                    classification: llm.classification,
                    confidence: llm.confidence.clamp(0.0, 1.0),
                },
                tokens,
            ),
            Err(LlmError::Parse(e)) | Err(LlmError::Transport(e)) => {
                debug!(post_id = state.post_id(), error = e.as_str(), "Classification defaulted");
                (
                    ClassificationOutcome {
                        classification: Classification::Other,
                        confidence: 0.0,
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
                    classification: Some(outcome.classification),
                    classification_confidence: Some(outcome.confidence),
                    ..Default::default()
                },
            )
            .await?;

        let output = serde_json::json!({
            "classification": outcome.classification.as_str(),
            "confidence": outcome.confidence,
        });
        state.classification = Some(outcome);
        Ok(StageOutcome::ok_with(output, tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_decodes_enum_values() {
        let v: ClassificationLlmVerdict =
            serde_json::from_str(r#"{"classification": "feature_request", "confidence": 0.9}"#)
                .unwrap();
        assert_eq!(v.classification, Classification::FeatureRequest);
    }

    #[test]
    fn unknown_labels_fail_to_decode() {
        let result = serde_json::from_str::<ClassificationLlmVerdict>(
            r#"{"classification": "rant", "confidence": 0.9}"#,
        );
        assert!(result.is_err());
    }
}
