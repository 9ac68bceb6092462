use anyhow::{Context, Result};
use serde::Deserialize;

/// One API credential for the source forum. Multiple credentials form the
/// rotation pool.
#[derive(Debug, Clone, Deserialize)]
pub struct RedditCredential {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Process
    pub environment: String,
    pub port: u16,

    // Database
    pub database_url: String,

    // LLM
    pub openai_api_key: String,
    pub chat_model: String,
    pub embedding_model: String,

    // Source API
    pub reddit_user_agent: String,
    pub reddit_credentials: Vec<RedditCredential>,

    // Collector
    pub sub_sources: Vec<String>,
    pub collector_target_count: usize,
    pub seen_ttl_days: i64,

    // Tuning
    pub orch_concurrency: usize,
    pub cluster_similarity_threshold: f64,
    pub max_tokens_per_minute: u32,
    pub max_requests_per_minute: u32,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub centroid_update_batch_size: i64,
    pub min_cluster_size: i64,
}

impl Config {
    /// Load config for the enrichment server / worker.
    pub fn server_from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            environment: env_or("ENVIRONMENT", "development"),
            port: env_or("PORT", "3000").parse().context("PORT must be a number")?,
            database_url: required("DATABASE_URL")?,
            openai_api_key: required("OPENAI_API_KEY")?,
            chat_model: env_or("OPENAI_CHAT_MODEL", "gpt-4o-mini"),
            embedding_model: env_or("OPENAI_EMBEDDING_MODEL", "text-embedding-3-small"),
            reddit_user_agent: std::env::var("REDDIT_USER_AGENT").unwrap_or_default(),
            reddit_credentials: Vec::new(),
            sub_sources: Vec::new(),
            collector_target_count: 0,
            seen_ttl_days: parse_or("SEEN_TTL_DAYS", 90),
            orch_concurrency: parse_or("ORCH_CONCURRENCY", 5),
            cluster_similarity_threshold: parse_or("CLUSTER_SIMILARITY_THRESHOLD", 0.7),
            max_tokens_per_minute: parse_or("MAX_TOKENS_PER_MINUTE", 100_000),
            max_requests_per_minute: parse_or("MAX_REQUESTS_PER_MINUTE", 100),
            retry_attempts: parse_or("RETRY_ATTEMPTS", 3),
            retry_delay_ms: parse_or("RETRY_DELAY_MS", 1000),
            centroid_update_batch_size: parse_or("CENTROID_UPDATE_BATCH_SIZE", 100),
            min_cluster_size: parse_or("MIN_CLUSTER_SIZE", 5),
        })
    }

    /// Load config for the collector (source API credentials required, no LLM).
    pub fn collector_from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let sub_sources: Vec<String> = env_or("SUBREDDITS", "")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if sub_sources.is_empty() {
            anyhow::bail!("SUBREDDITS must list at least one sub-source");
        }

        Ok(Self {
            environment: env_or("ENVIRONMENT", "development"),
            port: 0,
            database_url: required("DATABASE_URL")?,
            openai_api_key: String::new(),
            chat_model: String::new(),
            embedding_model: String::new(),
            reddit_user_agent: required("REDDIT_USER_AGENT")?,
            reddit_credentials: load_credentials()?,
            sub_sources,
            collector_target_count: parse_or("COLLECTOR_TARGET_COUNT", 500),
            seen_ttl_days: parse_or("SEEN_TTL_DAYS", 90),
            orch_concurrency: parse_or("ORCH_CONCURRENCY", 5),
            cluster_similarity_threshold: parse_or("CLUSTER_SIMILARITY_THRESHOLD", 0.7),
            max_tokens_per_minute: parse_or("MAX_TOKENS_PER_MINUTE", 100_000),
            max_requests_per_minute: parse_or("MAX_REQUESTS_PER_MINUTE", 100),
            retry_attempts: parse_or("RETRY_ATTEMPTS", 3),
            retry_delay_ms: parse_or("RETRY_DELAY_MS", 1000),
            centroid_update_batch_size: parse_or("CENTROID_UPDATE_BATCH_SIZE", 100),
            min_cluster_size: parse_or("MIN_CLUSTER_SIZE", 5),
        })
    }

    /// Log a redacted view of the loaded configuration.
    pub fn log_redacted(&self) {
        tracing::info!(
            environment = self.environment.as_str(),
            credentials = self.reddit_credentials.len(),
            sub_sources = self.sub_sources.len(),
            openai_key_chars = self.openai_api_key.len(),
            "Configuration loaded"
        );
    }
}

/// Credentials come either from a REDDIT_ACCOUNTS JSON array or from the
/// single-credential env vars.
fn load_credentials() -> Result<Vec<RedditCredential>> {
    if let Ok(raw) = std::env::var("REDDIT_ACCOUNTS") {
        let accounts: Vec<RedditCredential> =
            serde_json::from_str(&raw).context("REDDIT_ACCOUNTS must be a JSON array")?;
        if accounts.is_empty() {
            anyhow::bail!("REDDIT_ACCOUNTS must not be empty");
        }
        return Ok(accounts);
    }

    Ok(vec![RedditCredential {
        client_id: required("REDDIT_CLIENT_ID")?,
        client_secret: required("REDDIT_CLIENT_SECRET")?,
        username: required("REDDIT_USERNAME")?,
        password: required("REDDIT_PASSWORD")?,
    }])
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("{key} environment variable is required"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
