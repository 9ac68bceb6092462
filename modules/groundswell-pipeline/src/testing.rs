//! In-memory fakes for the store and LLM seams. Used by this crate's unit
//! tests and the integration suite.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use ai_client::{AiError, ChatOutput, ChatService, EmbeddingService};
use groundswell_common::{
    EnrichedPost, EnrichmentUpdate, Mention, PostStatus, RawPost, EMBEDDING_DIM,
};
use groundswell_store::{AuditEntry, JobCounts};

use crate::registry::cosine_similarity;
use crate::traits::{
    AuditSink, CategoryStore, ClusterHit, ClusterStore, JobBoard, MentionStore, PostStore,
};

// ---------------------------------------------------------------------------
// Posts
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryPostStore {
    records: Mutex<HashMap<String, EnrichedPost>>,
    raws: Mutex<HashMap<String, RawPost>>,
    /// When set, the next `apply_update` fails (fatal-path testing).
    fail_updates: std::sync::atomic::AtomicBool,
}

impl MemoryPostStore {
    pub fn fail_next_update(&self) {
        self.fail_updates.store(true, Ordering::Relaxed);
    }

    pub fn enriched(&self, post_id: &str) -> Option<EnrichedPost> {
        self.records.lock().unwrap().get(post_id).cloned()
    }

    pub fn status_of(&self, post_id: &str) -> Option<PostStatus> {
        self.enriched(post_id).map(|r| r.status)
    }

    pub fn cluster_of(&self, post_id: &str) -> Option<i64> {
        self.enriched(post_id).and_then(|r| r.cluster_id)
    }

    pub fn derived_ids(&self, parent_id: &str) -> Vec<String> {
        let records = self.records.lock().unwrap();
        records
            .keys()
            .filter(|id| id.starts_with(&format!("{parent_id}-Derived-")))
            .cloned()
            .collect()
    }

    pub fn insert_unprocessed(&self, raw: RawPost) {
        let record = blank_record(&raw);
        self.raws.lock().unwrap().insert(raw.id.clone(), raw.clone());
        self.records.lock().unwrap().insert(raw.id, record);
    }

    pub fn embeddings_in_cluster(&self, cluster_id: i64) -> Vec<Vec<f32>> {
        self.records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.cluster_id == Some(cluster_id))
            .filter_map(|r| r.embedding.clone())
            .collect()
    }

    fn move_cluster(&self, from: i64, to: i64) -> u64 {
        let mut records = self.records.lock().unwrap();
        let mut moved = 0;
        for record in records.values_mut() {
            if record.cluster_id == Some(from) {
                record.cluster_id = Some(to);
                moved += 1;
            }
        }
        moved
    }
}

fn blank_record(raw: &RawPost) -> EnrichedPost {
    EnrichedPost {
        post_id: raw.id.clone(),
        status: PostStatus::Unprocessed,
        is_spam: None,
        has_pii: None,
        moderation_notes: None,
        is_valid: None,
        validity_reason: None,
        classification: None,
        classification_confidence: None,
        summary: None,
        keywords: Vec::new(),
        embedding: None,
        sentiment_label: None,
        sentiment_score: None,
        category_id: None,
        cluster_id: None,
        retry_count: 0,
        error_message: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        processing_started_at: None,
        processed_at: None,
        failed_at: None,
    }
}

#[async_trait]
impl PostStore for MemoryPostStore {
    async fn get_enriched(&self, post_id: &str) -> Result<Option<EnrichedPost>> {
        Ok(self.enriched(post_id))
    }

    async fn acquire_lock(&self, post: &RawPost, max_retries: i32) -> Result<bool> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .entry(post.id.clone())
            .or_insert_with(|| blank_record(post));
        self.raws
            .lock()
            .unwrap()
            .entry(post.id.clone())
            .or_insert_with(|| post.clone());

        let lockable = matches!(record.status, PostStatus::Unprocessed)
            || (matches!(record.status, PostStatus::Failed) && record.retry_count < max_retries);
        if lockable {
            record.status = PostStatus::Processing;
            record.processing_started_at = Some(Utc::now());
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn insert_derived(&self, _parent_id: &str, post: &RawPost) -> Result<()> {
        let mut record = blank_record(post);
        record.status = PostStatus::Processing;
        record.processing_started_at = Some(Utc::now());
        self.records.lock().unwrap().insert(post.id.clone(), record);
        self.raws.lock().unwrap().insert(post.id.clone(), post.clone());
        Ok(())
    }

    async fn apply_update(&self, post_id: &str, update: &EnrichmentUpdate) -> Result<()> {
        if self.fail_updates.swap(false, Ordering::Relaxed) {
            anyhow::bail!("simulated store failure");
        }
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.get_mut(post_id) else {
            anyhow::bail!("unknown post {post_id}");
        };

        if let Some(v) = update.is_spam {
            record.is_spam = Some(v);
        }
        if let Some(v) = update.has_pii {
            record.has_pii = Some(v);
        }
        if let Some(v) = &update.moderation_notes {
            record.moderation_notes = Some(v.clone());
        }
        if let Some(v) = update.is_valid {
            record.is_valid = Some(v);
        }
        if let Some(v) = &update.validity_reason {
            record.validity_reason = Some(v.clone());
        }
        if let Some(v) = update.classification {
            record.classification = Some(v);
        }
        if let Some(v) = update.classification_confidence {
            record.classification_confidence = Some(v);
        }
        if let Some(v) = &update.summary {
            record.summary = Some(v.clone());
        }
        if let Some(v) = &update.keywords {
            record.keywords = v.clone();
        }
        if let Some(v) = &update.embedding {
            record.embedding = Some(v.clone());
        }
        if let Some(v) = update.sentiment_label {
            record.sentiment_label = Some(v);
        }
        if let Some(v) = update.sentiment_score {
            record.sentiment_score = Some(v);
        }
        if let Some(v) = update.category_id {
            record.category_id = Some(v);
        }
        if let Some(v) = update.cluster_id {
            record.cluster_id = Some(v);
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_processed(&self, post_id: &str) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.get_mut(post_id) {
            record.status = PostStatus::Processed;
            record.processed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_failed(&self, post_id: &str, error: &str) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.get_mut(post_id) {
            record.status = PostStatus::Failed;
            record.failed_at = Some(Utc::now());
            record.retry_count += 1;
            record.error_message = Some(error.to_string());
        }
        Ok(())
    }

    async fn fetch_unprocessed(&self, limit: i64) -> Result<Vec<RawPost>> {
        let records = self.records.lock().unwrap();
        let raws = self.raws.lock().unwrap();
        let mut unprocessed: Vec<RawPost> = records
            .values()
            .filter(|r| matches!(r.status, PostStatus::Unprocessed))
            .filter_map(|r| raws.get(&r.post_id).cloned())
            .collect();
        unprocessed.sort_by(|a, b| a.id.cmp(&b.id));
        unprocessed.truncate(limit as usize);
        Ok(unprocessed)
    }

    async fn processed_with_embeddings(
        &self,
        after_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<(String, Vec<f32>, i64)>> {
        let records = self.records.lock().unwrap();
        let mut rows: Vec<(String, Vec<f32>, i64)> = records
            .values()
            .filter(|r| matches!(r.status, PostStatus::Processed))
            .filter(|r| after_id.map(|a| r.post_id.as_str() > a).unwrap_or(true))
            .filter_map(|r| {
                Some((r.post_id.clone(), r.embedding.clone()?, r.cluster_id?))
            })
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn reassign_cluster(&self, post_id: &str, cluster_id: i64) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.get_mut(post_id) {
            record.cluster_id = Some(cluster_id);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryCategoryStore {
    categories: Mutex<Vec<(i64, String, Option<i64>)>>,
    next_id: AtomicI64,
}

impl MemoryCategoryStore {
    pub fn name_of(&self, id: i64) -> Option<String> {
        self.categories
            .lock()
            .unwrap()
            .iter()
            .find(|(cid, _, _)| *cid == id)
            .map(|(_, name, _)| name.clone())
    }
}

#[async_trait]
impl CategoryStore for MemoryCategoryStore {
    async fn find_or_create(
        &self,
        name: &str,
        _description: &str,
        parent_id: Option<i64>,
    ) -> Result<i64> {
        let mut categories = self.categories.lock().unwrap();
        if let Some((id, _, _)) = categories.iter().find(|(_, n, _)| n == name) {
            return Ok(*id);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        categories.push((id, name.to_string(), parent_id));
        Ok(id)
    }

    async fn all_names(&self) -> Result<Vec<String>> {
        Ok(self
            .categories
            .lock()
            .unwrap()
            .iter()
            .map(|(_, name, _)| name.clone())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Clusters
// ---------------------------------------------------------------------------

struct MemoryCluster {
    id: i64,
    name: String,
    centroid: Vec<f32>,
    member_count: i64,
    category_id: Option<i64>,
}

#[derive(Default)]
pub struct MemoryClusterStore {
    clusters: Mutex<Vec<MemoryCluster>>,
    next_id: AtomicI64,
    cas_failures: AtomicU32,
    posts: Option<Arc<MemoryPostStore>>,
}

impl MemoryClusterStore {
    /// Attach a post store so member embeddings and reassignment work.
    pub fn with_posts(posts: Arc<MemoryPostStore>) -> Self {
        Self {
            posts: Some(posts),
            ..Default::default()
        }
    }

    /// Make the next `n` compare-and-set updates fail (conflict simulation).
    pub fn fail_next_cas(&self, n: u32) {
        self.cas_failures.store(n, Ordering::Relaxed);
    }
}

#[async_trait]
impl ClusterStore for MemoryClusterStore {
    async fn find_nearest(&self, embedding: &[f32], threshold: f64) -> Result<Option<ClusterHit>> {
        let clusters = self.clusters.lock().unwrap();
        let mut best: Option<ClusterHit> = None;
        for cluster in clusters.iter() {
            let similarity = cosine_similarity(embedding, &cluster.centroid);
            if similarity >= threshold
                && best.as_ref().map(|b| similarity > b.similarity).unwrap_or(true)
            {
                best = Some(ClusterHit {
                    id: cluster.id,
                    name: cluster.name.clone(),
                    centroid: cluster.centroid.clone(),
                    member_count: cluster.member_count,
                    category_id: cluster.category_id,
                    similarity,
                });
            }
        }
        Ok(best)
    }

    async fn create(&self, name: &str, centroid: &[f32], category_id: Option<i64>) -> Result<i64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.clusters.lock().unwrap().push(MemoryCluster {
            id,
            name: name.to_string(),
            centroid: centroid.to_vec(),
            member_count: 1,
            category_id,
        });
        Ok(id)
    }

    async fn get(&self, id: i64) -> Result<Option<ClusterHit>> {
        let clusters = self.clusters.lock().unwrap();
        Ok(clusters.iter().find(|c| c.id == id).map(|c| ClusterHit {
            id: c.id,
            name: c.name.clone(),
            centroid: c.centroid.clone(),
            member_count: c.member_count,
            category_id: c.category_id,
            similarity: 0.0,
        }))
    }

    async fn all(&self) -> Result<Vec<ClusterHit>> {
        let clusters = self.clusters.lock().unwrap();
        Ok(clusters
            .iter()
            .map(|c| ClusterHit {
                id: c.id,
                name: c.name.clone(),
                centroid: c.centroid.clone(),
                member_count: c.member_count,
                category_id: c.category_id,
                similarity: 0.0,
            })
            .collect())
    }

    async fn try_update_centroid(
        &self,
        id: i64,
        centroid: &[f32],
        expected_member_count: i64,
    ) -> Result<bool> {
        if self
            .cas_failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
        {
            return Ok(false);
        }

        let mut clusters = self.clusters.lock().unwrap();
        let Some(cluster) = clusters.iter_mut().find(|c| c.id == id) else {
            return Ok(false);
        };
        if cluster.member_count != expected_member_count {
            return Ok(false);
        }
        cluster.centroid = centroid.to_vec();
        cluster.member_count += 1;
        Ok(true)
    }

    async fn set_centroid(&self, id: i64, centroid: &[f32], member_count: i64) -> Result<()> {
        let mut clusters = self.clusters.lock().unwrap();
        if let Some(cluster) = clusters.iter_mut().find(|c| c.id == id) {
            cluster.centroid = centroid.to_vec();
            cluster.member_count = member_count;
        }
        Ok(())
    }

    async fn member_embeddings(&self, id: i64) -> Result<Vec<Vec<f32>>> {
        Ok(self
            .posts
            .as_ref()
            .map(|p| p.embeddings_in_cluster(id))
            .unwrap_or_default())
    }

    async fn reassign_posts(&self, from: i64, to: i64) -> Result<u64> {
        Ok(self
            .posts
            .as_ref()
            .map(|p| p.move_cluster(from, to))
            .unwrap_or(0))
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.clusters.lock().unwrap().retain(|c| c.id != id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Mentions / audit / queue
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryMentionStore {
    mentions: Mutex<Vec<Mention>>,
}

impl MemoryMentionStore {
    pub fn count_for(&self, post_id: &str) -> usize {
        self.mentions
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.post_id == post_id)
            .count()
    }

    pub fn total(&self) -> usize {
        self.mentions.lock().unwrap().len()
    }
}

#[async_trait]
impl MentionStore for MemoryMentionStore {
    async fn insert(&self, mention: &Mention) -> Result<()> {
        let mut mentions = self.mentions.lock().unwrap();
        // Mirrors the unique index on post_id.
        if !mentions.iter().any(|m| m.post_id == mention.post_id) {
            mentions.push(mention.clone());
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct NullAudit;

#[async_trait]
impl AuditSink for NullAudit {
    async fn record(&self, _entry: &AuditEntry) {}
}

#[derive(Default)]
pub struct MemoryJobBoard {
    pub queued: Mutex<Vec<RawPost>>,
    pub waiting: AtomicI64,
    pub active: AtomicI64,
}

#[async_trait]
impl JobBoard for MemoryJobBoard {
    async fn counts(&self) -> Result<JobCounts> {
        Ok(JobCounts {
            waiting: self.waiting.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            completed: 0,
            failed: 0,
        })
    }

    async fn enqueue_bulk(&self, posts: &[RawPost]) -> Result<usize> {
        self.queued.lock().unwrap().extend(posts.iter().cloned());
        self.waiting
            .fetch_add(posts.len() as i64, Ordering::Relaxed);
        Ok(posts.len())
    }

    async fn in_flight_post_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .queued
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.id.clone())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// LLM fakes
// ---------------------------------------------------------------------------

/// Chat fake keyed by structured-output schema name. Unknown schemas get a
/// non-transient API error, which stages turn into their defaults.
#[derive(Default)]
pub struct ScriptedChat {
    responses: Mutex<HashMap<String, serde_json::Value>>,
}

impl ScriptedChat {
    pub fn respond(&self, schema_name: &str, value: serde_json::Value) {
        self.responses
            .lock()
            .unwrap()
            .insert(schema_name.to_string(), value);
    }

    /// A happy-path script for an ordinary valid question post.
    pub fn happy_path() -> Self {
        let chat = Self::default();
        chat.respond(
            "SpamLlmVerdict",
            serde_json::json!({ "is_spam": false, "has_pii": false, "notes": null }),
        );
        chat.respond(
            "ValidityLlmVerdict",
            serde_json::json!({
                "is_problem": true,
                "reason": "Describes a concrete household problem",
                "derived_problems": null
            }),
        );
        chat.respond(
            "ClassificationLlmVerdict",
            serde_json::json!({ "classification": "question", "confidence": 0.9 }),
        );
        chat.respond(
            "SemanticLlmVerdict",
            serde_json::json!({
                "summary": "A faucet keeps dripping despite tightening.",
                "keywords": ["faucet", "leak", "plumbing"]
            }),
        );
        chat.respond(
            "SentimentLlmVerdict",
            serde_json::json!({ "sentiment": "negative", "score": -0.4, "confidence": 0.8 }),
        );
        chat.respond(
            "CategoryLlmVerdict",
            serde_json::json!({
                "industry": "Home & DIY",
                "description": "Household repairs",
                "parent_industry": null
            }),
        );
        chat
    }
}

#[async_trait]
impl ChatService for ScriptedChat {
    async fn chat(&self, _system: &str, _user: &str) -> Result<ChatOutput, AiError> {
        Err(AiError::EmptyResponse)
    }

    async fn structured(
        &self,
        _system: &str,
        _user: &str,
        schema_name: &str,
        _schema: serde_json::Value,
    ) -> Result<ChatOutput, AiError> {
        let responses = self.responses.lock().unwrap();
        match responses.get(schema_name) {
            Some(value) => Ok(ChatOutput {
                content: value.to_string(),
                tokens_used: 25,
            }),
            None => Err(AiError::Api {
                status: 400,
                body: format!("no scripted response for {schema_name}"),
            }),
        }
    }
}

/// Embedder returning a configurable fixed vector.
pub struct FixedEmbedder {
    embedding: Mutex<Vec<f32>>,
}

impl FixedEmbedder {
    pub fn new(embedding: Vec<f32>) -> Self {
        Self {
            embedding: Mutex::new(embedding),
        }
    }

    /// Unit vector of the full embedding dimension with one hot component.
    pub fn unit(hot: usize) -> Self {
        let mut v = vec![0.0; EMBEDDING_DIM];
        v[hot] = 1.0;
        Self::new(v)
    }

    pub fn set(&self, embedding: Vec<f32>) {
        *self.embedding.lock().unwrap() = embedding;
    }
}

#[async_trait]
impl EmbeddingService for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, AiError> {
        Ok(self.embedding.lock().unwrap().clone())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AiError> {
        let embedding = self.embedding.lock().unwrap().clone();
        Ok(texts.iter().map(|_| embedding.clone()).collect())
    }
}

/// A raw post builder for tests.
pub fn raw_post(id: &str, title: &str, body: &str) -> RawPost {
    RawPost {
        id: id.to_string(),
        source: "reddit".to_string(),
        title: title.to_string(),
        body: body.to_string(),
        author: "tester".to_string(),
        score: 7,
        url: format!("https://www.reddit.com/r/test/{id}"),
        sub_source: "test".to_string(),
        created_at: 1_700_000_000,
        metadata: serde_json::Value::Null,
    }
}
