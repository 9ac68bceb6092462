pub mod audit;
pub mod categories;
pub mod clusters;
pub mod kv;
pub mod mentions;
pub mod migrate;
pub mod posts;
pub mod queue;

pub use audit::{AuditEntry, AuditLog};
pub use categories::{Category, CategoryRepo};
pub use clusters::{ClusterRepo, ClusterRow, NearestCluster};
pub use kv::{KvStore, SeenSets};
pub use mentions::MentionRepo;
pub use migrate::migrate;
pub use posts::PostRepo;
pub use queue::{Job, JobCounts, JobQueue};

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Connect to Postgres with a small pool sized for a single service process.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("Failed to connect to Postgres")
}
