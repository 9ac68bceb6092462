use anyhow::Result;
use sqlx::PgPool;
use tracing::info;

/// Run idempotent schema migrations: extensions, tables, indexes.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    info!("Running schema migrations...");

    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
        .execute(pool)
        .await?;

    let tables = [
        r#"
        CREATE TABLE IF NOT EXISTS posts (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            body TEXT NOT NULL DEFAULT '',
            author TEXT NOT NULL DEFAULT '',
            score BIGINT NOT NULL DEFAULT 0,
            url TEXT NOT NULL DEFAULT '',
            sub_source TEXT NOT NULL DEFAULT '',
            post_created_at BIGINT NOT NULL DEFAULT 0,
            metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
            parent_post_id TEXT,
            status TEXT NOT NULL DEFAULT 'unprocessed',
            is_spam BOOLEAN,
            has_pii BOOLEAN,
            moderation_notes TEXT,
            is_valid BOOLEAN,
            validity_reason TEXT,
            classification TEXT,
            classification_confidence DOUBLE PRECISION,
            summary TEXT,
            keywords TEXT[] NOT NULL DEFAULT '{}',
            embedding vector(1536),
            sentiment_label TEXT,
            sentiment_score DOUBLE PRECISION,
            category_id BIGINT,
            cluster_id BIGINT,
            retry_count INT NOT NULL DEFAULT 0,
            error_message TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            processing_started_at TIMESTAMPTZ,
            processed_at TIMESTAMPTZ,
            failed_at TIMESTAMPTZ
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS categories (
            id BIGSERIAL PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT '',
            parent_id BIGINT REFERENCES categories(id),
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS clusters (
            id BIGSERIAL PRIMARY KEY,
            name TEXT NOT NULL,
            centroid vector(1536) NOT NULL,
            member_count BIGINT NOT NULL DEFAULT 1,
            category_id BIGINT,
            metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS mentions (
            id BIGSERIAL PRIMARY KEY,
            post_id TEXT NOT NULL UNIQUE,
            cluster_id BIGINT NOT NULL,
            category_id BIGINT NOT NULL,
            sentiment_score DOUBLE PRECISION NOT NULL,
            engagement_score DOUBLE PRECISION NOT NULL DEFAULT 0,
            mentioned_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS trends (
            id BIGSERIAL PRIMARY KEY,
            cluster_id BIGINT NOT NULL,
            period_start TIMESTAMPTZ NOT NULL,
            score DOUBLE PRECISION NOT NULL DEFAULT 0,
            mention_count BIGINT NOT NULL DEFAULT 0,
            UNIQUE (cluster_id, period_start)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            id BIGSERIAL PRIMARY KEY,
            post_id TEXT NOT NULL,
            stage TEXT NOT NULL,
            success BOOLEAN NOT NULL,
            latency_ms BIGINT NOT NULL DEFAULT 0,
            tokens_used INT NOT NULL DEFAULT 0,
            error TEXT,
            output JSONB,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS kv_entries (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            expires_at TIMESTAMPTZ
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS seen_ids (
            scope TEXT NOT NULL,
            id TEXT NOT NULL,
            expires_at TIMESTAMPTZ,
            PRIMARY KEY (scope, id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id BIGSERIAL PRIMARY KEY,
            queue TEXT NOT NULL,
            payload JSONB NOT NULL,
            status TEXT NOT NULL DEFAULT 'waiting',
            attempts INT NOT NULL DEFAULT 0,
            max_attempts INT NOT NULL DEFAULT 3,
            next_run_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            last_error TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    ];

    for ddl in &tables {
        sqlx::query(ddl).execute(pool).await?;
    }
    info!("Tables created");

    let indexes = [
        "CREATE INDEX IF NOT EXISTS posts_status_idx ON posts (status)",
        "CREATE INDEX IF NOT EXISTS posts_sub_source_idx ON posts (sub_source, post_created_at)",
        "CREATE INDEX IF NOT EXISTS posts_cluster_idx ON posts (cluster_id)",
        "CREATE INDEX IF NOT EXISTS posts_embedding_idx ON posts USING hnsw (embedding vector_cosine_ops)",
        "CREATE INDEX IF NOT EXISTS clusters_centroid_idx ON clusters USING hnsw (centroid vector_cosine_ops)",
        "CREATE INDEX IF NOT EXISTS mentions_cluster_idx ON mentions (cluster_id, mentioned_at)",
        "CREATE INDEX IF NOT EXISTS audit_log_post_idx ON audit_log (post_id)",
        "CREATE INDEX IF NOT EXISTS jobs_claim_idx ON jobs (queue, status, next_run_at)",
    ];

    for idx in &indexes {
        sqlx::query(idx).execute(pool).await?;
    }
    info!("Indexes created");

    Ok(())
}
