//! Industry category assignment (find-or-create by name).

use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::debug;

use groundswell_common::EnrichmentUpdate;

use crate::llm::LlmError;
use crate::pipeline::PipelineDeps;
use crate::stage::{Stage, StageOutcome};
use crate::state::PipelineState;

/// Seed candidates offered alongside whatever categories already exist.
const INDUSTRY_CANDIDATES: [&str; 12] = [
    "Software & SaaS",
    "Consumer Hardware",
    "Home & DIY",
    "Health & Fitness",
    "Finance & Banking",
    "E-commerce & Retail",
    "Travel & Hospitality",
    "Education",
    "Gaming",
    "Automotive",
    "Food & Beverage",
    "Other",
];

#[derive(Debug, Deserialize, JsonSchema)]
struct CategoryLlmVerdict {
    /// Chosen industry label, ideally from the candidate list.
    industry: String,
    /// One-line description of the category.
    description: String,
    /// Optional broader parent industry.
    parent_industry: Option<String>,
}

pub struct CategoryAssign;

#[async_trait]
impl Stage for CategoryAssign {
    fn name(&self) -> &'static str {
        "category_assign"
    }

    async fn run(&self, deps: &PipelineDeps, state: &mut PipelineState) -> Result<StageOutcome> {
        let existing = deps.categories.all_names().await?;
        let mut candidates: Vec<&str> = INDUSTRY_CANDIDATES.to_vec();
        for name in &existing {
            if !candidates.iter().any(|c| c.eq_ignore_ascii_case(name)) {
                candidates.push(name.as_str());
            }
        }

        let system = "Assign the post's problem to an industry category. Prefer one of \
                      the provided candidates; invent a new label only when none fits. \
                      Optionally name a broader parent industry.";
        let user = format!(
            "Candidates: {}\n\nTitle: {}\n\nBody: {}",
            candidates.join(", "),
            state.raw.title,
            state.raw.body
        );

        let (verdict, tokens) = match deps
            .llm
            .structured::<CategoryLlmVerdict>(system, &user)
            .await
        {
            Ok((llm, tokens)) => (llm, tokens),
            Err(LlmError::Parse(e)) | Err(LlmError::Transport(e)) => {
                debug!(post_id = state.post_id(), error = e.as_str(), "Category defaulted to Other");
                (
                    CategoryLlmVerdict {
                        industry: "Other".to_string(),
                        description: "Uncategorized problems".to_string(),
                        parent_industry: None,
                    },
                    0,
                )
            }
            Err(LlmError::Cancelled) => anyhow::bail!("cancelled"),
        };

        let parent_id = match &verdict.parent_industry {
            Some(parent) if !parent.trim().is_empty() && parent != &verdict.industry => Some(
                deps.categories
                    .find_or_create(parent.trim(), "", None)
                    .await?,
            ),
            _ => None,
        };

        let category_id = deps
            .categories
            .find_or_create(verdict.industry.trim(), &verdict.description, parent_id)
            .await?;

        deps.posts
            .apply_update(
                state.post_id(),
                &EnrichmentUpdate {
                    category_id: Some(category_id),
                    ..Default::default()
                },
            )
            .await?;

        let output = serde_json::json!({
            "industry": verdict.industry,
            "category_id": category_id,
        });
        state.category_id = Some(category_id);
        Ok(StageOutcome::ok_with(output, tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_decodes_with_optional_parent() {
        let v: CategoryLlmVerdict = serde_json::from_str(
            r#"{"industry": "Home & DIY", "description": "Household repairs", "parent_industry": null}"#,
        )
        .unwrap();
        assert_eq!(v.industry, "Home & DIY");
        assert!(v.parent_industry.is_none());
    }

    #[test]
    fn candidate_list_contains_fallback() {
        assert!(INDUSTRY_CANDIDATES.contains(&"Other"));
    }
}
