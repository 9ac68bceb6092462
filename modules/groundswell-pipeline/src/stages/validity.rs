//! Is this post an actual problem worth tracking?

use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::debug;

use groundswell_common::{DerivedProblem, EnrichmentUpdate};

use crate::llm::LlmError;
use crate::pipeline::PipelineDeps;
use crate::stage::{Stage, StageOutcome};
use crate::state::{PipelineState, ValidityVerdict};

/// Posts shorter than this cannot express a meaningful problem.
const MIN_CONTENT_CHARS: usize = 10;

const TOO_SHORT_REASON: &str = "Content too short to be meaningful";

#[derive(Debug, Deserialize, JsonSchema)]
struct ValidityLlmVerdict {
    /// Whether the post describes a genuine problem.
    is_problem: bool,
    reason: String,
    /// Distinct sub-problems worth tracking separately, if any.
    derived_problems: Option<Vec<DerivedProblem>>,
}

pub struct ValidityCheck;

#[async_trait]
impl Stage for ValidityCheck {
    fn name(&self) -> &'static str {
        "validity_check"
    }

    async fn run(&self, deps: &PipelineDeps, state: &mut PipelineState) -> Result<StageOutcome> {
        let content = state.raw.content();

        // Reject without an LLM round-trip.
        if content.trim().len() < MIN_CONTENT_CHARS {
            let verdict = ValidityVerdict {
                is_valid: false,
                reason: TOO_SHORT_REASON.to_string(),
                derived_problems: Vec::new(),
            };
            self.write_through(deps, state, &verdict).await?;
            state.validity = Some(verdict);
            return Ok(StageOutcome::ok_with(
                serde_json::json!({ "is_valid": false, "reason": TOO_SHORT_REASON }),
                0,
            ));
        }

        let system = "You analyze forum posts for a problem-tracking platform. Decide \
                      whether the post describes a real problem someone is having \
                      (bug reports, frustrations, unmet needs count; memes, jokes and \
                      announcements do not). If the post bundles several distinct \
                      problems, list them as derived problems with a short label, an \
                      explanation, and the industry they belong to.";
        let user = format!("Title: {}\n\nBody: {}", state.raw.title, state.raw.body);

        let (verdict, tokens) = match deps.llm.structured::<ValidityLlmVerdict>(system, &user).await
        {
            Ok((llm, tokens)) => (
                ValidityVerdict {
                    is_valid: llm.is_problem,
                    reason: llm.reason,
                    derived_problems: llm.derived_problems.unwrap_or_default(),
                },
                tokens,
            ),
            // Default on unusable output: let the post through so downstream
            // signals can still be mined from it.
            Err(LlmError::Parse(e)) | Err(LlmError::Transport(e)) => {
                debug!(post_id = state.post_id(), error = e.as_str(), "Validity LLM unavailable, defaulting to valid");
                (
                    ValidityVerdict {
                        is_valid: true,
                        reason: "Unverified (analysis unavailable)".to_string(),
                        derived_problems: Vec::new(),
                    },
                    0,
                )
            }
            Err(LlmError::Cancelled) => anyhow::bail!("cancelled"),
        };

        let output = serde_json::json!({
            "is_valid": verdict.is_valid,
            "reason": verdict.reason,
            "derived_problems": verdict.derived_problems.len(),
        });

        self.write_through(deps, state, &verdict).await?;
        state.validity = Some(verdict);
        Ok(StageOutcome::ok_with(output, tokens))
    }
}

impl ValidityCheck {
    async fn write_through(
        &self,
        deps: &PipelineDeps,
        state: &PipelineState,
        verdict: &ValidityVerdict,
    ) -> Result<()> {
        deps.posts
            .apply_update(
                state.post_id(),
                &EnrichmentUpdate {
                    is_valid: Some(verdict.is_valid),
                    validity_reason: Some(verdict.reason.clone()),
                    ..Default::default()
                },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_content_threshold_is_ten_chars() {
        assert!("hi".trim().len() < MIN_CONTENT_CHARS);
        assert!("a real problem description".len() >= MIN_CONTENT_CHARS);
    }

    #[test]
    fn llm_verdict_decodes_with_and_without_derivations() {
        let bare: ValidityLlmVerdict = serde_json::from_str(
            r#"{"is_problem": true, "reason": "real issue", "derived_problems": null}"#,
        )
        .unwrap();
        assert!(bare.is_problem);
        assert!(bare.derived_problems.is_none());

        let derived: ValidityLlmVerdict = serde_json::from_str(
            r#"{"is_problem": true, "reason": "two issues", "derived_problems": [
                {"label": "slow sync", "explanation": "sync takes hours", "industry": "saas"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(derived.derived_problems.unwrap().len(), 1);
    }
}
