//! Per-post stage orchestration: locking, idempotency, early termination,
//! derived-problem fan-out, terminal status writes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::{info, warn};
use uuid::Uuid;

use groundswell_common::{Metrics, RawPost};
use groundswell_store::AuditEntry;

use crate::llm::LlmGate;
use crate::stage::{should_stop, Stage};
use crate::stages;
use crate::state::{PipelineState, StageRecord};
use crate::traits::{AuditSink, CategoryStore, ClusterStore, MentionStore, PostStore};

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub max_retries: i32,
    pub cluster_similarity_threshold: f64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            cluster_similarity_threshold: 0.7,
        }
    }
}

/// Dependency container handed to every stage.
pub struct PipelineDeps {
    pub posts: Arc<dyn PostStore>,
    pub categories: Arc<dyn CategoryStore>,
    pub clusters: Arc<dyn ClusterStore>,
    pub mentions: Arc<dyn MentionStore>,
    pub audit: Arc<dyn AuditSink>,
    pub llm: Arc<LlmGate>,
    pub metrics: Arc<Metrics>,
    pub options: PipelineOptions,
    pub cancel: Arc<AtomicBool>,
}

/// How a pipeline run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// The record was already `processed`; nothing to do.
    AlreadyProcessed,
    /// Another worker holds the post (or retries are exhausted).
    LockNotAcquired,
    /// Early termination on spam/PII or invalidity; record is `processed`.
    Halted,
    /// Full stage sequence ran; record is `processed`.
    Completed,
}

pub struct Pipeline {
    deps: Arc<PipelineDeps>,
}

impl Pipeline {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }

    pub fn deps(&self) -> &Arc<PipelineDeps> {
        &self.deps
    }

    /// Process one raw post to a terminal state.
    ///
    /// Errors out only on store I/O failures or cancellation; in both
    /// cases the record is marked `failed` (with `retry_count` bumped) and
    /// the error is rethrown so the queue applies its retry policy. Stage
    /// failures never propagate.
    pub async fn process(&self, raw: RawPost) -> Result<PipelineOutcome> {
        let deps = &self.deps;

        // Idempotent short-circuit.
        if let Some(existing) = deps.posts.get_enriched(&raw.id).await? {
            if existing.status == groundswell_common::PostStatus::Processed {
                info!(post_id = raw.id.as_str(), "Already processed, skipping");
                return Ok(PipelineOutcome::AlreadyProcessed);
            }
        }

        // One worker per (post, epoch).
        if !deps.posts.acquire_lock(&raw, deps.options.max_retries).await? {
            info!(post_id = raw.id.as_str(), "Lock not acquired, skipping");
            return Ok(PipelineOutcome::LockNotAcquired);
        }

        let mut state = PipelineState::new(raw);
        match self.run_locked(&mut state).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                // Terminal for this attempt; the queue owns further retries.
                let message = e.to_string();
                if let Err(mark_err) = deps.posts.mark_failed(state.post_id(), &message).await {
                    warn!(post_id = state.post_id(), error = %mark_err, "Failed to mark post failed");
                }
                Err(e)
            }
        }
    }

    async fn run_locked(&self, state: &mut PipelineState) -> Result<PipelineOutcome> {
        let deps = &self.deps;

        // Screening stages, with the early-termination checkpoint after each.
        for stage in [&stages::SpamCheck as &dyn Stage, &stages::ValidityCheck] {
            self.run_stage(stage, state).await?;
            if should_stop(state) {
                deps.posts.mark_processed(state.post_id()).await?;
                info!(
                    post_id = state.post_id(),
                    stage = stage.name(),
                    "Pipeline halted early"
                );
                return Ok(PipelineOutcome::Halted);
            }
        }

        // Derived problems replace the parent in the downstream stages: each
        // derivation becomes its own linked record.
        let derivations = state
            .validity
            .as_ref()
            .map(|v| v.derived_problems.clone())
            .unwrap_or_default();

        if derivations.is_empty() {
            self.run_downstream(state).await?;
        } else {
            for problem in &derivations {
                let child_raw = derived_post(&state.raw, &problem.label, &problem.explanation);
                deps.posts.insert_derived(state.post_id(), &child_raw).await?;

                let mut child = state.derive(child_raw);
                self.run_downstream(&mut child).await?;
                deps.posts.mark_processed(child.post_id()).await?;
            }
            info!(
                post_id = state.post_id(),
                derived = derivations.len(),
                "Processed derived problems"
            );
        }

        deps.posts.mark_processed(state.post_id()).await?;
        Ok(PipelineOutcome::Completed)
    }

    async fn run_downstream(&self, state: &mut PipelineState) -> Result<()> {
        for stage in stages::downstream_chain() {
            self.run_stage(stage.as_ref(), state).await?;
        }
        Ok(())
    }

    /// Run one stage with timing, metrics, audit, and the stage-record
    /// envelope. `Err` from a stage (store I/O, cancellation) is fatal.
    async fn run_stage(&self, stage: &dyn Stage, state: &mut PipelineState) -> Result<()> {
        let deps = &self.deps;

        if deps.cancel.load(Ordering::Relaxed) {
            anyhow::bail!("pipeline cancelled");
        }

        let started = Instant::now();
        let result = stage.run(deps, state).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                deps.metrics.record(stage.name(), false, latency_ms, 0);
                deps.audit
                    .record(&AuditEntry {
                        post_id: state.post_id().to_string(),
                        stage: stage.name().to_string(),
                        success: false,
                        latency_ms,
                        tokens_used: 0,
                        error: Some(e.to_string()),
                        output: None,
                    })
                    .await;
                return Err(e);
            }
        };

        deps.metrics
            .record(stage.name(), outcome.success, latency_ms, outcome.tokens_used);
        deps.audit
            .record(&AuditEntry {
                post_id: state.post_id().to_string(),
                stage: stage.name().to_string(),
                success: outcome.success,
                latency_ms,
                tokens_used: outcome.tokens_used,
                error: outcome.error.clone(),
                output: outcome.output.clone(),
            })
            .await;

        if !outcome.success {
            warn!(
                post_id = state.post_id(),
                stage = stage.name(),
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "Stage failed, continuing"
            );
        }

        state.records.push(StageRecord {
            stage: stage.name(),
            success: outcome.success,
            error: outcome.error,
            latency_ms,
            tokens_used: outcome.tokens_used,
        });
        Ok(())
    }
}

/// Synthetic raw post for one derived problem.
fn derived_post(parent: &RawPost, label: &str, explanation: &str) -> RawPost {
    RawPost {
        id: format!("{}-Derived-{}", parent.id, Uuid::new_v4()),
        source: parent.source.clone(),
        title: label.to_string(),
        body: explanation.to_string(),
        author: parent.author.clone(),
        score: parent.score,
        url: parent.url.clone(),
        sub_source: parent.sub_source.clone(),
        created_at: parent.created_at,
        metadata: parent.metadata.clone(),
    }
}
