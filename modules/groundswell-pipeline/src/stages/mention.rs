//! Terminal stage: record the trend-tracking mention.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use groundswell_common::Mention;

use crate::pipeline::PipelineDeps;
use crate::stage::{Stage, StageOutcome};
use crate::state::PipelineState;

pub struct RecordMention;

#[async_trait]
impl Stage for RecordMention {
    fn name(&self) -> &'static str {
        "record_mention"
    }

    async fn run(&self, deps: &PipelineDeps, state: &mut PipelineState) -> Result<StageOutcome> {
        // Only when cluster, category and sentiment all landed.
        let (Some(cluster_id), Some(category_id), Some(sentiment)) =
            (state.cluster_id, state.category_id, state.sentiment.as_ref())
        else {
            return Ok(StageOutcome::failed("prerequisite stages incomplete"));
        };

        let mention = Mention {
            post_id: state.post_id().to_string(),
            cluster_id,
            category_id,
            sentiment_score: sentiment.score,
            engagement_score: state.raw.score as f64,
            mentioned_at: Utc::now(),
        };

        deps.mentions.insert(&mention).await?;

        state.mention_recorded = true;
        Ok(StageOutcome::ok_with(
            serde_json::json!({ "cluster_id": cluster_id, "category_id": category_id }),
            0,
        ))
    }
}
