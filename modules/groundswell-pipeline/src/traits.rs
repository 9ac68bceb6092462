//! Seams between the pipeline and its stores.
//!
//! The Postgres repositories in `groundswell-store` satisfy these directly;
//! `testing` provides in-memory fakes.

use anyhow::Result;
use async_trait::async_trait;

use groundswell_common::{EnrichedPost, EnrichmentUpdate, Mention, RawPost};
use groundswell_store::{AuditEntry, JobCounts};

/// Enriched-post persistence.
#[async_trait]
pub trait PostStore: Send + Sync {
    async fn get_enriched(&self, post_id: &str) -> Result<Option<EnrichedPost>>;

    /// Atomic upsert-and-reserve; `true` exactly once per (post, epoch).
    async fn acquire_lock(&self, post: &RawPost, max_retries: i32) -> Result<bool>;

    async fn insert_derived(&self, parent_id: &str, post: &RawPost) -> Result<()>;
    async fn apply_update(&self, post_id: &str, update: &EnrichmentUpdate) -> Result<()>;
    async fn mark_processed(&self, post_id: &str) -> Result<()>;
    async fn mark_failed(&self, post_id: &str, error: &str) -> Result<()>;

    async fn fetch_unprocessed(&self, limit: i64) -> Result<Vec<RawPost>>;
    async fn processed_with_embeddings(
        &self,
        after_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<(String, Vec<f32>, i64)>>;
    async fn reassign_cluster(&self, post_id: &str, cluster_id: i64) -> Result<()>;
}

#[async_trait]
pub trait CategoryStore: Send + Sync {
    /// Unique by name; concurrent callers resolve to the same id.
    async fn find_or_create(
        &self,
        name: &str,
        description: &str,
        parent_id: Option<i64>,
    ) -> Result<i64>;

    async fn all_names(&self) -> Result<Vec<String>>;
}

/// A cluster row as the pipeline sees it.
#[derive(Debug, Clone)]
pub struct ClusterHit {
    pub id: i64,
    pub name: String,
    pub centroid: Vec<f32>,
    pub member_count: i64,
    pub category_id: Option<i64>,
    /// Cosine similarity to the query (0 when not from a search).
    pub similarity: f64,
}

#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Single nearest centroid with similarity >= threshold.
    async fn find_nearest(&self, embedding: &[f32], threshold: f64) -> Result<Option<ClusterHit>>;

    async fn create(&self, name: &str, centroid: &[f32], category_id: Option<i64>) -> Result<i64>;
    async fn get(&self, id: i64) -> Result<Option<ClusterHit>>;
    async fn all(&self) -> Result<Vec<ClusterHit>>;

    /// Compare-and-set: applies the new centroid and bumps `member_count`
    /// only if it still equals `expected_member_count`.
    async fn try_update_centroid(
        &self,
        id: i64,
        centroid: &[f32],
        expected_member_count: i64,
    ) -> Result<bool>;

    async fn set_centroid(&self, id: i64, centroid: &[f32], member_count: i64) -> Result<()>;
    async fn member_embeddings(&self, id: i64) -> Result<Vec<Vec<f32>>>;
    async fn reassign_posts(&self, from: i64, to: i64) -> Result<u64>;
    async fn delete(&self, id: i64) -> Result<()>;
}

#[async_trait]
pub trait MentionStore: Send + Sync {
    async fn insert(&self, mention: &Mention) -> Result<()>;
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &AuditEntry);
}

/// The queue surface the refiller needs.
#[async_trait]
pub trait JobBoard: Send + Sync {
    async fn counts(&self) -> Result<JobCounts>;
    async fn enqueue_bulk(&self, posts: &[RawPost]) -> Result<usize>;
    async fn in_flight_post_ids(&self) -> Result<Vec<String>>;
}

// --- Postgres-backed implementations ---

#[async_trait]
impl PostStore for groundswell_store::PostRepo {
    async fn get_enriched(&self, post_id: &str) -> Result<Option<EnrichedPost>> {
        groundswell_store::PostRepo::get_enriched(self, post_id).await
    }

    async fn acquire_lock(&self, post: &RawPost, max_retries: i32) -> Result<bool> {
        groundswell_store::PostRepo::acquire_lock(self, post, max_retries).await
    }

    async fn insert_derived(&self, parent_id: &str, post: &RawPost) -> Result<()> {
        groundswell_store::PostRepo::insert_derived(self, parent_id, post).await
    }

    async fn apply_update(&self, post_id: &str, update: &EnrichmentUpdate) -> Result<()> {
        groundswell_store::PostRepo::apply_update(self, post_id, update).await
    }

    async fn mark_processed(&self, post_id: &str) -> Result<()> {
        groundswell_store::PostRepo::mark_processed(self, post_id).await
    }

    async fn mark_failed(&self, post_id: &str, error: &str) -> Result<()> {
        groundswell_store::PostRepo::mark_failed(self, post_id, error).await
    }

    async fn fetch_unprocessed(&self, limit: i64) -> Result<Vec<RawPost>> {
        groundswell_store::PostRepo::fetch_unprocessed(self, limit).await
    }

    async fn processed_with_embeddings(
        &self,
        after_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<(String, Vec<f32>, i64)>> {
        groundswell_store::PostRepo::processed_with_embeddings(self, after_id, limit).await
    }

    async fn reassign_cluster(&self, post_id: &str, cluster_id: i64) -> Result<()> {
        groundswell_store::PostRepo::reassign_cluster(self, post_id, cluster_id).await
    }
}

#[async_trait]
impl CategoryStore for groundswell_store::CategoryRepo {
    async fn find_or_create(
        &self,
        name: &str,
        description: &str,
        parent_id: Option<i64>,
    ) -> Result<i64> {
        Ok(groundswell_store::CategoryRepo::find_or_create(self, name, description, parent_id)
            .await?
            .id)
    }

    async fn all_names(&self) -> Result<Vec<String>> {
        groundswell_store::CategoryRepo::all_names(self).await
    }
}

fn hit_from_row(row: groundswell_store::ClusterRow, similarity: f64) -> ClusterHit {
    ClusterHit {
        id: row.id,
        name: row.name,
        centroid: row.centroid.to_vec(),
        member_count: row.member_count,
        category_id: row.category_id,
        similarity,
    }
}

#[async_trait]
impl ClusterStore for groundswell_store::ClusterRepo {
    async fn find_nearest(&self, embedding: &[f32], threshold: f64) -> Result<Option<ClusterHit>> {
        let nearest = groundswell_store::ClusterRepo::find_nearest(self, embedding, threshold).await?;
        Ok(nearest.map(|n| hit_from_row(n.cluster, n.similarity)))
    }

    async fn create(&self, name: &str, centroid: &[f32], category_id: Option<i64>) -> Result<i64> {
        Ok(groundswell_store::ClusterRepo::create(self, name, centroid, category_id)
            .await?
            .id)
    }

    async fn get(&self, id: i64) -> Result<Option<ClusterHit>> {
        let row = groundswell_store::ClusterRepo::get(self, id).await?;
        Ok(row.map(|r| hit_from_row(r, 0.0)))
    }

    async fn all(&self) -> Result<Vec<ClusterHit>> {
        let rows = groundswell_store::ClusterRepo::all(self).await?;
        Ok(rows.into_iter().map(|r| hit_from_row(r, 0.0)).collect())
    }

    async fn try_update_centroid(
        &self,
        id: i64,
        centroid: &[f32],
        expected_member_count: i64,
    ) -> Result<bool> {
        groundswell_store::ClusterRepo::try_update_centroid(self, id, centroid, expected_member_count)
            .await
    }

    async fn set_centroid(&self, id: i64, centroid: &[f32], member_count: i64) -> Result<()> {
        groundswell_store::ClusterRepo::set_centroid(self, id, centroid, member_count).await
    }

    async fn member_embeddings(&self, id: i64) -> Result<Vec<Vec<f32>>> {
        groundswell_store::ClusterRepo::member_embeddings(self, id).await
    }

    async fn reassign_posts(&self, from: i64, to: i64) -> Result<u64> {
        groundswell_store::ClusterRepo::reassign_posts(self, from, to).await
    }

    async fn delete(&self, id: i64) -> Result<()> {
        groundswell_store::ClusterRepo::delete(self, id).await
    }
}

#[async_trait]
impl MentionStore for groundswell_store::MentionRepo {
    async fn insert(&self, mention: &Mention) -> Result<()> {
        groundswell_store::MentionRepo::insert(self, mention).await
    }
}

#[async_trait]
impl AuditSink for groundswell_store::AuditLog {
    async fn record(&self, entry: &AuditEntry) {
        groundswell_store::AuditLog::record(self, entry).await
    }
}

#[async_trait]
impl JobBoard for groundswell_store::JobQueue {
    async fn counts(&self) -> Result<JobCounts> {
        groundswell_store::JobQueue::counts(self).await
    }

    async fn enqueue_bulk(&self, posts: &[RawPost]) -> Result<usize> {
        groundswell_store::JobQueue::enqueue_bulk(self, posts).await
    }

    async fn in_flight_post_ids(&self) -> Result<Vec<String>> {
        groundswell_store::JobQueue::in_flight_post_ids(self).await
    }
}
