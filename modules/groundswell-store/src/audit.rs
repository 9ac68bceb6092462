use anyhow::Result;
use sqlx::PgPool;
use tracing::warn;

/// One stage call, for the audit trail.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub post_id: String,
    pub stage: String,
    pub success: bool,
    pub latency_ms: u64,
    pub tokens_used: u32,
    pub error: Option<String>,
    pub output: Option<serde_json::Value>,
}

#[derive(Clone)]
pub struct AuditLog {
    pool: PgPool,
}

impl AuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Best-effort append; an audit failure is logged, never propagated.
    pub async fn record(&self, entry: &AuditEntry) {
        let result = sqlx::query(
            "INSERT INTO audit_log (post_id, stage, success, latency_ms, tokens_used, error, output)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&entry.post_id)
        .bind(&entry.stage)
        .bind(entry.success)
        .bind(entry.latency_ms as i64)
        .bind(entry.tokens_used as i32)
        .bind(&entry.error)
        .bind(&entry.output)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(post_id = entry.post_id.as_str(), stage = entry.stage.as_str(), error = %e, "Audit write failed");
        }
    }
}
