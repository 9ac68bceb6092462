use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use pgvector::Vector;
use sqlx::PgPool;

use groundswell_common::{
    Classification, EnrichedPost, EnrichmentUpdate, PostStatus, RawPost, SentimentLabel,
};

/// Repository over the `posts` table: raw ingest columns plus the
/// enrichment columns the pipeline fills in.
#[derive(Clone)]
pub struct PostRepo {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct PostRow {
    id: String,
    status: String,
    is_spam: Option<bool>,
    has_pii: Option<bool>,
    moderation_notes: Option<String>,
    is_valid: Option<bool>,
    validity_reason: Option<String>,
    classification: Option<String>,
    classification_confidence: Option<f64>,
    summary: Option<String>,
    keywords: Vec<String>,
    embedding: Option<Vector>,
    sentiment_label: Option<String>,
    sentiment_score: Option<f64>,
    category_id: Option<i64>,
    cluster_id: Option<i64>,
    retry_count: i32,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    processing_started_at: Option<DateTime<Utc>>,
    processed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
}

impl From<PostRow> for EnrichedPost {
    fn from(row: PostRow) -> Self {
        EnrichedPost {
            post_id: row.id,
            status: PostStatus::parse(&row.status).unwrap_or(PostStatus::Unprocessed),
            is_spam: row.is_spam,
            has_pii: row.has_pii,
            moderation_notes: row.moderation_notes,
            is_valid: row.is_valid,
            validity_reason: row.validity_reason,
            classification: row.classification.as_deref().and_then(Classification::parse),
            classification_confidence: row.classification_confidence,
            summary: row.summary,
            keywords: row.keywords,
            embedding: row.embedding.map(|v| v.to_vec()),
            sentiment_label: row.sentiment_label.as_deref().and_then(SentimentLabel::parse),
            sentiment_score: row.sentiment_score,
            category_id: row.category_id,
            cluster_id: row.cluster_id,
            retry_count: row.retry_count,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            processing_started_at: row.processing_started_at,
            processed_at: row.processed_at,
            failed_at: row.failed_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RawRow {
    id: String,
    source: String,
    title: String,
    body: String,
    author: String,
    score: i64,
    url: String,
    sub_source: String,
    post_created_at: i64,
    metadata: serde_json::Value,
}

impl From<RawRow> for RawPost {
    fn from(row: RawRow) -> Self {
        RawPost {
            id: row.id,
            source: row.source,
            title: row.title,
            body: row.body,
            author: row.author,
            score: row.score,
            url: row.url,
            sub_source: row.sub_source,
            created_at: row.post_created_at,
            metadata: row.metadata,
        }
    }
}

impl PostRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert harvested posts as `unprocessed`; already-present ids are left
    /// untouched. Returns the number actually inserted.
    pub async fn insert_raw_many(&self, posts: &[RawPost]) -> Result<u64> {
        let mut inserted = 0;
        for post in posts {
            let result = sqlx::query(
                "INSERT INTO posts
                     (id, source, title, body, author, score, url, sub_source,
                      post_created_at, metadata, status)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'unprocessed')
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(&post.id)
            .bind(&post.source)
            .bind(&post.title)
            .bind(&post.body)
            .bind(&post.author)
            .bind(post.score)
            .bind(&post.url)
            .bind(&post.sub_source)
            .bind(post.created_at)
            .bind(&post.metadata)
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }

    /// Stream every post id for a source in one pass (dedup warm-start).
    pub async fn all_ids(&self, source: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut rows = sqlx::query_as::<_, (String,)>("SELECT id FROM posts WHERE source = $1")
            .bind(source)
            .fetch(&self.pool);
        while let Some(row) = rows.try_next().await? {
            ids.push(row.0);
        }
        Ok(ids)
    }

    /// Oldest unprocessed posts, for queue refill.
    pub async fn fetch_unprocessed(&self, limit: i64) -> Result<Vec<RawPost>> {
        let rows = sqlx::query_as::<_, RawRow>(
            "SELECT id, source, title, body, author, score, url, sub_source,
                    post_created_at, metadata
             FROM posts
             WHERE status = 'unprocessed'
             ORDER BY created_at
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn get_enriched(&self, post_id: &str) -> Result<Option<EnrichedPost>> {
        let row = sqlx::query_as::<_, PostRow>(
            "SELECT id, status, is_spam, has_pii, moderation_notes, is_valid,
                    validity_reason, classification, classification_confidence,
                    summary, keywords, embedding, sentiment_label, sentiment_score,
                    category_id, cluster_id, retry_count, error_message,
                    created_at, updated_at, processing_started_at, processed_at, failed_at
             FROM posts WHERE id = $1",
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    pub async fn get_status(&self, post_id: &str) -> Result<Option<PostStatus>> {
        let row = sqlx::query_as::<_, (String,)>("SELECT status FROM posts WHERE id = $1")
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|r| PostStatus::parse(&r.0)))
    }

    /// Atomic upsert-and-reserve. Inserts the post if absent, then flips it
    /// to `processing`, but only from `unprocessed`, or from `failed` while
    /// `retry_count` is under the cap. Returns `true` exactly once per
    /// (post, epoch): a post already processing, processed, or out of
    /// retries yields `false`.
    pub async fn acquire_lock(&self, post: &RawPost, max_retries: i32) -> Result<bool> {
        let row = sqlx::query_as::<_, (String,)>(
            "INSERT INTO posts
                 (id, source, title, body, author, score, url, sub_source,
                  post_created_at, metadata, status, processing_started_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'processing', now())
             ON CONFLICT (id) DO UPDATE SET
                 status = 'processing',
                 processing_started_at = now(),
                 updated_at = now()
             WHERE posts.status = 'unprocessed'
                OR (posts.status = 'failed' AND posts.retry_count < $11)
             RETURNING id",
        )
        .bind(&post.id)
        .bind(&post.source)
        .bind(&post.title)
        .bind(&post.body)
        .bind(&post.author)
        .bind(post.score)
        .bind(&post.url)
        .bind(&post.sub_source)
        .bind(post.created_at)
        .bind(&post.metadata)
        .bind(max_retries)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Insert a derived-problem record linked to its parent, already in
    /// `processing` state.
    pub async fn insert_derived(&self, parent_id: &str, post: &RawPost) -> Result<()> {
        sqlx::query(
            "INSERT INTO posts
                 (id, source, title, body, author, score, url, sub_source,
                  post_created_at, metadata, parent_post_id, status, processing_started_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'processing', now())
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(&post.id)
        .bind(&post.source)
        .bind(&post.title)
        .bind(&post.body)
        .bind(&post.author)
        .bind(post.score)
        .bind(&post.url)
        .bind(&post.sub_source)
        .bind(post.created_at)
        .bind(&post.metadata)
        .bind(parent_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Write the columns a stage produced. `None` fields are untouched.
    pub async fn apply_update(&self, post_id: &str, update: &EnrichmentUpdate) -> Result<()> {
        sqlx::query(
            "UPDATE posts SET
                 is_spam = COALESCE($2, is_spam),
                 has_pii = COALESCE($3, has_pii),
                 moderation_notes = COALESCE($4, moderation_notes),
                 is_valid = COALESCE($5, is_valid),
                 validity_reason = COALESCE($6, validity_reason),
                 classification = COALESCE($7, classification),
                 classification_confidence = COALESCE($8, classification_confidence),
                 summary = COALESCE($9, summary),
                 keywords = COALESCE($10, keywords),
                 embedding = COALESCE($11, embedding),
                 sentiment_label = COALESCE($12, sentiment_label),
                 sentiment_score = COALESCE($13, sentiment_score),
                 category_id = COALESCE($14, category_id),
                 cluster_id = COALESCE($15, cluster_id),
                 updated_at = now()
             WHERE id = $1",
        )
        .bind(post_id)
        .bind(update.is_spam)
        .bind(update.has_pii)
        .bind(&update.moderation_notes)
        .bind(update.is_valid)
        .bind(&update.validity_reason)
        .bind(update.classification.map(|c| c.as_str()))
        .bind(update.classification_confidence)
        .bind(&update.summary)
        .bind(&update.keywords)
        .bind(update.embedding.clone().map(Vector::from))
        .bind(update.sentiment_label.map(|s| s.as_str()))
        .bind(update.sentiment_score)
        .bind(update.category_id)
        .bind(update.cluster_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_processed(&self, post_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE posts SET status = 'processed', processed_at = now(), updated_at = now()
             WHERE id = $1",
        )
        .bind(post_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Terminal failure for this attempt: flips to `failed` and bumps the
    /// retry counter in one atomic statement.
    pub async fn mark_failed(&self, post_id: &str, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE posts SET status = 'failed', failed_at = now(),
                 retry_count = retry_count + 1, error_message = $2, updated_at = now()
             WHERE id = $1",
        )
        .bind(post_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Processed posts with an embedding and cluster assignment, paged by id
    /// (outlier reassignment sweep).
    pub async fn processed_with_embeddings(
        &self,
        after_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<(String, Vec<f32>, i64)>> {
        let rows = sqlx::query_as::<_, (String, Vector, i64)>(
            "SELECT id, embedding, cluster_id
             FROM posts
             WHERE status = 'processed' AND embedding IS NOT NULL AND cluster_id IS NOT NULL
               AND ($1::text IS NULL OR id > $1)
             ORDER BY id
             LIMIT $2",
        )
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, v, c)| (id, v.to_vec(), c))
            .collect())
    }

    /// Move a post to a different cluster (outlier sweep / merge).
    pub async fn reassign_cluster(&self, post_id: &str, cluster_id: i64) -> Result<()> {
        sqlx::query("UPDATE posts SET cluster_id = $2, updated_at = now() WHERE id = $1")
            .bind(post_id)
            .bind(cluster_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
