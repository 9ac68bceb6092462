use anyhow::Result;
use sqlx::PgPool;

use groundswell_common::Mention;

#[derive(Clone)]
pub struct MentionRepo {
    pool: PgPool,
}

impl MentionRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one mention. The unique index on `post_id` makes a re-run of an
    /// already-recorded post a no-op, preserving exactly-one-per-post.
    pub async fn insert(&self, mention: &Mention) -> Result<()> {
        sqlx::query(
            "INSERT INTO mentions
                 (post_id, cluster_id, category_id, sentiment_score, engagement_score, mentioned_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (post_id) DO NOTHING",
        )
        .bind(&mention.post_id)
        .bind(mention.cluster_id)
        .bind(mention.category_id)
        .bind(mention.sentiment_score)
        .bind(mention.engagement_score)
        .bind(mention.mentioned_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count_for_post(&self, post_id: &str) -> Result<i64> {
        let row = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM mentions WHERE post_id = $1",
        )
        .bind(post_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }
}
