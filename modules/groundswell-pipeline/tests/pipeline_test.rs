//! End-to-end pipeline scenarios against in-memory stores and a scripted LLM.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use groundswell_common::{Classification, Metrics, PostStatus, SentimentLabel};
use groundswell_pipeline::testing::{
    raw_post, FixedEmbedder, MemoryCategoryStore, MemoryClusterStore, MemoryMentionStore,
    MemoryPostStore, NullAudit, ScriptedChat,
};
use groundswell_pipeline::{LlmGate, Pipeline, PipelineDeps, PipelineOptions, PipelineOutcome};

struct Harness {
    pipeline: Pipeline,
    posts: Arc<MemoryPostStore>,
    clusters: Arc<MemoryClusterStore>,
    categories: Arc<MemoryCategoryStore>,
    mentions: Arc<MemoryMentionStore>,
}

fn harness(chat: ScriptedChat, embedder: FixedEmbedder) -> Harness {
    let posts = Arc::new(MemoryPostStore::default());
    let clusters = Arc::new(MemoryClusterStore::with_posts(posts.clone()));
    let categories = Arc::new(MemoryCategoryStore::default());
    let mentions = Arc::new(MemoryMentionStore::default());
    let cancel = Arc::new(AtomicBool::new(false));

    let llm = Arc::new(LlmGate::new(
        Arc::new(chat),
        Arc::new(embedder),
        1000,
        1_000_000,
        1,
        Duration::from_millis(1),
        cancel.clone(),
    ));

    let deps = Arc::new(PipelineDeps {
        posts: posts.clone(),
        categories: categories.clone(),
        clusters: clusters.clone(),
        mentions: mentions.clone(),
        audit: Arc::new(NullAudit),
        llm,
        metrics: Arc::new(Metrics::new()),
        options: PipelineOptions::default(),
        cancel,
    });

    Harness {
        pipeline: Pipeline::new(deps),
        posts,
        clusters,
        categories,
        mentions,
    }
}

#[tokio::test]
async fn spam_post_halts_before_enrichment() {
    let h = harness(ScriptedChat::default(), FixedEmbedder::unit(0));
    let post = raw_post(
        "t3_spam",
        "Buy now! click here to win free money",
        "limited time",
    );

    let outcome = h.pipeline.process(post).await.unwrap();
    assert_eq!(outcome, PipelineOutcome::Halted);

    let record = h.posts.enriched("t3_spam").unwrap();
    assert_eq!(record.status, PostStatus::Processed);
    assert_eq!(record.is_spam, Some(true));
    assert!(record.classification.is_none());
    assert_eq!(h.mentions.total(), 0);
}

#[tokio::test]
async fn pii_post_halts_before_enrichment() {
    let h = harness(ScriptedChat::default(), FixedEmbedder::unit(0));
    let post = raw_post(
        "t3_pii",
        "Identity theft question",
        "someone posted my SSN 123-45-6789 on a forum, what now?",
    );

    let outcome = h.pipeline.process(post).await.unwrap();
    assert_eq!(outcome, PipelineOutcome::Halted);

    let record = h.posts.enriched("t3_pii").unwrap();
    assert_eq!(record.has_pii, Some(true));
    assert_eq!(h.mentions.total(), 0);
}

#[tokio::test]
async fn too_short_post_is_invalid_and_skips_downstream() {
    let chat = ScriptedChat::default();
    chat.respond(
        "SpamLlmVerdict",
        serde_json::json!({ "is_spam": false, "has_pii": false, "notes": null }),
    );
    let h = harness(chat, FixedEmbedder::unit(0));

    let outcome = h.pipeline.process(raw_post("t3_short", "", "hi")).await.unwrap();
    assert_eq!(outcome, PipelineOutcome::Halted);

    let record = h.posts.enriched("t3_short").unwrap();
    assert_eq!(record.status, PostStatus::Processed);
    assert_eq!(record.is_valid, Some(false));
    assert_eq!(
        record.validity_reason.as_deref(),
        Some("Content too short to be meaningful")
    );
    assert!(record.classification.is_none());
    assert!(record.embedding.is_none());
    assert_eq!(h.mentions.total(), 0);
}

#[tokio::test]
async fn happy_path_enriches_and_records_one_mention() {
    let h = harness(ScriptedChat::happy_path(), FixedEmbedder::unit(3));
    let post = raw_post(
        "t3_faucet",
        "How do I fix my leaking faucet?",
        "I've tried tightening the nut but it still drips after 2 hours.",
    );

    let outcome = h.pipeline.process(post).await.unwrap();
    assert_eq!(outcome, PipelineOutcome::Completed);

    let record = h.posts.enriched("t3_faucet").unwrap();
    assert_eq!(record.status, PostStatus::Processed);
    assert_eq!(record.is_valid, Some(true));
    assert_eq!(record.classification, Some(Classification::Question));
    assert_eq!(record.sentiment_label, Some(SentimentLabel::Negative));
    assert_eq!(record.embedding.as_ref().map(|e| e.len()), Some(1536));
    assert_eq!(
        h.categories.name_of(record.category_id.unwrap()).as_deref(),
        Some("Home & DIY")
    );

    let cluster_id = record.cluster_id.unwrap();
    let cluster = h
        .clusters_get(cluster_id)
        .await
        .expect("cluster should exist");
    assert_eq!(cluster.member_count, 1);

    assert_eq!(h.mentions.count_for("t3_faucet"), 1);
}

#[tokio::test]
async fn similar_post_joins_cluster_and_increments_member_count() {
    let h = harness(ScriptedChat::happy_path(), FixedEmbedder::unit(3));

    h.pipeline
        .process(raw_post(
            "t3_one",
            "How do I fix my leaking faucet?",
            "I've tried tightening the nut but it still drips after 2 hours.",
        ))
        .await
        .unwrap();
    h.pipeline
        .process(raw_post(
            "t3_two",
            "Faucet still dripping",
            "Tightened everything, the faucet still drips overnight.",
        ))
        .await
        .unwrap();

    let first = h.posts.enriched("t3_one").unwrap();
    let second = h.posts.enriched("t3_two").unwrap();
    assert_eq!(first.cluster_id, second.cluster_id);

    let cluster = h.clusters_get(first.cluster_id.unwrap()).await.unwrap();
    assert_eq!(cluster.member_count, 2);
    assert_eq!(h.mentions.total(), 2);
}

#[tokio::test]
async fn reprocessing_a_processed_post_is_a_no_op() {
    let h = harness(ScriptedChat::happy_path(), FixedEmbedder::unit(3));
    let post = raw_post(
        "t3_once",
        "How do I fix my leaking faucet?",
        "I've tried tightening the nut but it still drips after 2 hours.",
    );

    let first = h.pipeline.process(post.clone()).await.unwrap();
    assert_eq!(first, PipelineOutcome::Completed);

    let before = h.posts.enriched("t3_once").unwrap();
    let second = h.pipeline.process(post).await.unwrap();
    assert_eq!(second, PipelineOutcome::AlreadyProcessed);

    let after = h.posts.enriched("t3_once").unwrap();
    assert_eq!(h.mentions.count_for("t3_once"), 1);
    assert_eq!(before.cluster_id, after.cluster_id);
    assert_eq!(before.processed_at, after.processed_at);
}

#[tokio::test]
async fn llm_failures_fall_back_to_stage_defaults() {
    // Scripted chat answers only spam/validity; every downstream verdict is
    // missing, so classification and sentiment use their defaults.
    let chat = ScriptedChat::default();
    chat.respond(
        "SpamLlmVerdict",
        serde_json::json!({ "is_spam": false, "has_pii": false, "notes": null }),
    );
    chat.respond(
        "ValidityLlmVerdict",
        serde_json::json!({ "is_problem": true, "reason": "real", "derived_problems": null }),
    );
    let h = harness(chat, FixedEmbedder::unit(5));

    let outcome = h
        .pipeline
        .process(raw_post(
            "t3_defaults",
            "My app keeps crashing",
            "It crashes whenever I open the settings page.",
        ))
        .await
        .unwrap();
    assert_eq!(outcome, PipelineOutcome::Completed);

    let record = h.posts.enriched("t3_defaults").unwrap();
    assert_eq!(record.status, PostStatus::Processed);
    assert_eq!(record.classification, Some(Classification::Other));
    assert_eq!(record.classification_confidence, Some(0.0));
    assert_eq!(record.sentiment_label, Some(SentimentLabel::Neutral));
    assert_eq!(record.sentiment_score, Some(0.0));
    // Category defaulted to Other, cluster still assigned, mention recorded.
    assert_eq!(
        h.categories.name_of(record.category_id.unwrap()).as_deref(),
        Some("Other")
    );
    assert!(record.cluster_id.is_some());
    assert_eq!(h.mentions.count_for("t3_defaults"), 1);
}

#[tokio::test]
async fn derived_problems_become_linked_records() {
    let chat = ScriptedChat::happy_path();
    chat.respond(
        "ValidityLlmVerdict",
        serde_json::json!({
            "is_problem": true,
            "reason": "bundles two problems",
            "derived_problems": [
                { "label": "slow sync", "explanation": "sync takes hours to finish", "industry": "saas" },
                { "label": "broken export", "explanation": "CSV export corrupts numbers", "industry": "saas" }
            ]
        }),
    );
    let h = harness(chat, FixedEmbedder::unit(7));

    let outcome = h
        .pipeline
        .process(raw_post(
            "t3_multi",
            "Sync is slow and export is broken",
            "Two separate issues with the same product.",
        ))
        .await
        .unwrap();
    assert_eq!(outcome, PipelineOutcome::Completed);

    let derived = h.posts.derived_ids("t3_multi");
    assert_eq!(derived.len(), 2);

    for id in &derived {
        let child = h.posts.enriched(id).unwrap();
        assert_eq!(child.status, PostStatus::Processed);
        assert!(child.cluster_id.is_some());
        assert_eq!(h.mentions.count_for(id), 1);
    }

    // The parent is processed; the derivations carried the downstream work.
    let parent = h.posts.enriched("t3_multi").unwrap();
    assert_eq!(parent.status, PostStatus::Processed);
    assert_eq!(h.mentions.count_for("t3_multi"), 0);
    assert_eq!(h.mentions.total(), 2);
}

#[tokio::test]
async fn store_failure_marks_post_failed_and_propagates() {
    let h = harness(ScriptedChat::happy_path(), FixedEmbedder::unit(3));
    h.posts.fail_next_update();

    let result = h
        .pipeline
        .process(raw_post(
            "t3_fatal",
            "How do I fix my leaking faucet?",
            "I've tried tightening the nut but it still drips after 2 hours.",
        ))
        .await;
    assert!(result.is_err());

    let record = h.posts.enriched("t3_fatal").unwrap();
    assert_eq!(record.status, PostStatus::Failed);
    assert_eq!(record.retry_count, 1);
    assert!(record.error_message.is_some());
    assert_eq!(h.mentions.total(), 0);
}

#[tokio::test]
async fn failed_post_can_be_retried_until_the_cap() {
    let h = harness(ScriptedChat::happy_path(), FixedEmbedder::unit(3));
    let post = raw_post(
        "t3_retry",
        "How do I fix my leaking faucet?",
        "I've tried tightening the nut but it still drips after 2 hours.",
    );

    h.posts.fail_next_update();
    assert!(h.pipeline.process(post.clone()).await.is_err());
    assert_eq!(h.posts.status_of("t3_retry"), Some(PostStatus::Failed));

    // Retry succeeds and reaches a terminal processed state.
    let outcome = h.pipeline.process(post).await.unwrap();
    assert_eq!(outcome, PipelineOutcome::Completed);
    assert_eq!(h.posts.status_of("t3_retry"), Some(PostStatus::Processed));
}

impl Harness {
    async fn clusters_get(
        &self,
        id: i64,
    ) -> Option<groundswell_pipeline::traits::ClusterHit> {
        use groundswell_pipeline::traits::ClusterStore;
        self.clusters.get(id).await.unwrap()
    }
}
