use anyhow::Result;
use chrono::{Duration, Utc};
use sqlx::PgPool;

/// Durable string KV with per-key TTL. Backs watermarks (`last_fetch:<sub>`),
/// credential cooldowns (`cooldown:<i>`) and the throughput counter
/// (`posts:fetched:current_minute`).
#[derive(Clone)]
pub struct KvStore {
    pool: PgPool,
}

impl KvStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a live value; expired entries read as absent.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query_as::<_, (String,)>(
            "SELECT value FROM kv_entries
             WHERE key = $1 AND (expires_at IS NULL OR expires_at > now())",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.0))
    }

    pub async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT key, value FROM kv_entries
             WHERE key = ANY($1) AND (expires_at IS NULL OR expires_at > now())",
        )
        .bind(keys)
        .fetch_all(&self.pool)
        .await?;

        let found: std::collections::HashMap<String, String> = rows.into_iter().collect();
        Ok(keys.iter().map(|k| found.get(k).cloned()).collect())
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|d| Utc::now() + d);
        sqlx::query(
            "INSERT INTO kv_entries (key, value, expires_at) VALUES ($1, $2, $3)
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomically add `delta` to an integer counter, (re)arming its TTL on
    /// first write. Returns the new value.
    pub async fn incr(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64> {
        let expires_at = Utc::now() + ttl;
        let row = sqlx::query_as::<_, (String,)>(
            "INSERT INTO kv_entries (key, value, expires_at)
             VALUES ($1, ($2::bigint)::text, $3)
             ON CONFLICT (key) DO UPDATE SET
                 value = CASE
                     WHEN kv_entries.expires_at IS NOT NULL AND kv_entries.expires_at <= now()
                         THEN EXCLUDED.value
                     ELSE (kv_entries.value::bigint + $2::bigint)::text
                 END,
                 expires_at = CASE
                     WHEN kv_entries.expires_at IS NOT NULL AND kv_entries.expires_at <= now()
                         THEN EXCLUDED.expires_at
                     ELSE kv_entries.expires_at
                 END
             RETURNING value",
        )
        .bind(key)
        .bind(delta)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0.parse().unwrap_or(0))
    }
}

/// Durable membership sets with TTL, keyed by scope (`seen:<source>`,
/// `seen_posts:<sub_source>`). One atomic statement per mutation; no
/// read-then-write.
#[derive(Clone)]
pub struct SeenSets {
    pool: PgPool,
}

impl SeenSets {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Add ids to a scope; returns one flag per input id, `true` iff the id
    /// was new. Expiry is pushed out on every write, so hot scopes never age
    /// out.
    pub async fn add_many(
        &self,
        scope: &str,
        ids: &[String],
        ttl: Duration,
    ) -> Result<Vec<bool>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let expires_at = Utc::now() + ttl;

        let mut tx = self.pool.begin().await?;

        // An expired id counts as new again.
        sqlx::query(
            "DELETE FROM seen_ids
             WHERE scope = $1 AND id = ANY($2)
               AND expires_at IS NOT NULL AND expires_at <= now()",
        )
        .bind(scope)
        .bind(ids)
        .execute(&mut *tx)
        .await?;

        // xmax = 0 distinguishes fresh inserts from conflict updates, so the
        // expiry refresh on already-seen ids never reports them as new.
        let rows = sqlx::query_as::<_, (String, bool)>(
            "INSERT INTO seen_ids (scope, id, expires_at)
             SELECT $1, unnest($2::text[]), $3
             ON CONFLICT (scope, id) DO UPDATE SET expires_at = EXCLUDED.expires_at
             RETURNING id, (xmax = 0) AS inserted",
        )
        .bind(scope)
        .bind(ids)
        .bind(expires_at)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let new_ids: std::collections::HashSet<String> = rows
            .into_iter()
            .filter(|(_, inserted)| *inserted)
            .map(|(id, _)| id)
            .collect();
        Ok(ids.iter().map(|id| new_ids.contains(id)).collect())
    }

    /// One pipelined multi-exists: a flag per input id, `true` iff present
    /// and unexpired.
    pub async fn contains_many(&self, scope: &str, ids: &[String]) -> Result<Vec<bool>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT id FROM seen_ids
             WHERE scope = $1 AND id = ANY($2)
               AND (expires_at IS NULL OR expires_at > now())",
        )
        .bind(scope)
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let present: std::collections::HashSet<String> = rows.into_iter().map(|r| r.0).collect();
        Ok(ids.iter().map(|id| present.contains(id)).collect())
    }
}
