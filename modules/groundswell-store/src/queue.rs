use anyhow::Result;
use chrono::{Duration, Utc};
use sqlx::PgPool;

use groundswell_common::RawPost;

const KEEP_COMPLETED: i64 = 100;
const KEEP_FAILED: i64 = 50;

/// A claimed job: the raw post payload plus the bookkeeping the worker needs
/// to complete or fail it.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: i64,
    pub post: RawPost,
    pub attempts: i32,
    pub max_attempts: i32,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct JobCounts {
    pub waiting: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
}

/// Durable at-least-once FIFO queue over the `jobs` table. Claims use
/// `FOR UPDATE SKIP LOCKED` so concurrent workers never double-claim.
#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
    name: String,
    max_attempts: i32,
    backoff_base: Duration,
}

impl JobQueue {
    pub fn new(pool: PgPool, name: impl Into<String>) -> Self {
        Self {
            pool,
            name: name.into(),
            max_attempts: 3,
            backoff_base: Duration::seconds(2),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub async fn enqueue(&self, post: &RawPost) -> Result<i64> {
        let row = sqlx::query_as::<_, (i64,)>(
            "INSERT INTO jobs (queue, payload, max_attempts) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(&self.name)
        .bind(serde_json::to_value(post)?)
        .bind(self.max_attempts)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    pub async fn enqueue_bulk(&self, posts: &[RawPost]) -> Result<usize> {
        for post in posts {
            self.enqueue(post).await?;
        }
        Ok(posts.len())
    }

    /// Claim the oldest runnable job, flipping it to `active`. Returns `None`
    /// when the queue is drained (or everything is backing off).
    pub async fn claim(&self) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, (i64, serde_json::Value, i32, i32)>(
            "UPDATE jobs SET status = 'active', updated_at = now()
             WHERE id = (
                 SELECT id FROM jobs
                 WHERE queue = $1 AND status = 'waiting' AND next_run_at <= now()
                 ORDER BY id
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, payload, attempts, max_attempts",
        )
        .bind(&self.name)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((id, payload, attempts, max_attempts)) => {
                let post: RawPost = serde_json::from_value(payload)?;
                Ok(Some(Job {
                    id,
                    post,
                    attempts,
                    max_attempts,
                }))
            }
            None => Ok(None),
        }
    }

    pub async fn complete(&self, job_id: i64) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = 'completed', updated_at = now() WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        self.prune("completed", KEEP_COMPLETED).await?;
        Ok(())
    }

    /// Record a failed attempt. Under the attempt cap the job re-enters
    /// `waiting` with exponential backoff (`base * 2^attempt`); at the cap it
    /// is parked as `failed`.
    pub async fn fail(&self, job_id: i64, error: &str) -> Result<()> {
        let row = sqlx::query_as::<_, (i32, i32)>(
            "UPDATE jobs SET attempts = attempts + 1, last_error = $2, updated_at = now()
             WHERE id = $1
             RETURNING attempts, max_attempts",
        )
        .bind(job_id)
        .bind(error)
        .fetch_one(&self.pool)
        .await?;

        let (attempts, max_attempts) = row;
        if attempts >= max_attempts {
            sqlx::query("UPDATE jobs SET status = 'failed', updated_at = now() WHERE id = $1")
                .bind(job_id)
                .execute(&self.pool)
                .await?;
            self.prune("failed", KEEP_FAILED).await?;
        } else {
            let next_run_at = Utc::now() + backoff_delay(self.backoff_base, attempts);
            sqlx::query(
                "UPDATE jobs SET status = 'waiting', next_run_at = $2, updated_at = now()
                 WHERE id = $1",
            )
            .bind(job_id)
            .bind(next_run_at)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn counts(&self) -> Result<JobCounts> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM jobs WHERE queue = $1 GROUP BY status",
        )
        .bind(&self.name)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = JobCounts::default();
        for (status, count) in rows {
            match status.as_str() {
                "waiting" => counts.waiting = count,
                "active" => counts.active = count,
                "completed" => counts.completed = count,
                "failed" => counts.failed = count,
                _ => {}
            }
        }
        Ok(counts)
    }

    /// Post ids currently waiting or active; the refiller skips these.
    pub async fn in_flight_post_ids(&self) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, (Option<String>,)>(
            "SELECT payload->>'id' FROM jobs
             WHERE queue = $1 AND status IN ('waiting', 'active')",
        )
        .bind(&self.name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().filter_map(|r| r.0).collect())
    }

    /// Keep only the newest `keep` rows in a terminal status.
    async fn prune(&self, status: &str, keep: i64) -> Result<()> {
        sqlx::query(
            "DELETE FROM jobs
             WHERE queue = $1 AND status = $2 AND id NOT IN (
                 SELECT id FROM jobs WHERE queue = $1 AND status = $2
                 ORDER BY id DESC LIMIT $3
             )",
        )
        .bind(&self.name)
        .bind(status)
        .bind(keep)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn backoff_delay(base: Duration, attempt: i32) -> Duration {
    let factor = 2i64.saturating_pow(attempt.max(0) as u32);
    base * factor as i32
}
