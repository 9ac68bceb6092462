//! Nearest-centroid cluster assignment with incremental centroid updates.

use anyhow::Result;
use async_trait::async_trait;

use groundswell_common::EnrichmentUpdate;

use crate::pipeline::PipelineDeps;
use crate::registry::ClusterRegistry;
use crate::stage::{Stage, StageOutcome};
use crate::state::PipelineState;

pub struct ClusterAssign;

#[async_trait]
impl Stage for ClusterAssign {
    fn name(&self) -> &'static str {
        "cluster_assign"
    }

    async fn run(&self, deps: &PipelineDeps, state: &mut PipelineState) -> Result<StageOutcome> {
        let Some(semantic) = &state.semantic else {
            return Ok(StageOutcome::failed("no embedding available"));
        };

        let registry = ClusterRegistry::new(
            deps.clusters.clone(),
            deps.options.cluster_similarity_threshold,
        );

        let name_hint = if semantic.keywords.is_empty() {
            state.raw.title.clone()
        } else {
            semantic.keywords.join(" ")
        };

        let assignment = registry
            .assign(&semantic.embedding, state.category_id, &name_hint)
            .await?;

        deps.posts
            .apply_update(
                state.post_id(),
                &EnrichmentUpdate {
                    cluster_id: Some(assignment.cluster_id),
                    ..Default::default()
                },
            )
            .await?;

        let output = serde_json::json!({
            "cluster_id": assignment.cluster_id,
            "created": assignment.created,
            "similarity": assignment.similarity,
        });
        state.cluster_id = Some(assignment.cluster_id);
        state.cluster_created = assignment.created;
        Ok(StageOutcome::ok_with(output, 0))
    }
}
