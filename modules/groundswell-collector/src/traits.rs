//! Seams between the collector and its durable stores / the forum API.
//!
//! The Postgres-backed types in `groundswell-store` satisfy these directly;
//! tests plug in in-memory fakes.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;

use groundswell_common::{GroundswellError, RawPost, RedditCredential};

use crate::planner::SamplingStrategy;

/// Durable string KV with TTL (watermarks, cooldowns, counters).
#[async_trait]
pub trait DurableCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    async fn incr(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64>;
}

/// Durable membership sets with TTL (`seen:<source>`).
#[async_trait]
pub trait SeenStore: Send + Sync {
    async fn add_many(&self, scope: &str, ids: &[String], ttl: Duration) -> Result<Vec<bool>>;
    async fn contains_many(&self, scope: &str, ids: &[String]) -> Result<Vec<bool>>;
}

/// Destination for harvested raw posts, plus the id scan for dedup
/// warm-start.
#[async_trait]
pub trait RawPostSink: Send + Sync {
    async fn persist(&self, posts: &[RawPost]) -> Result<u64>;
    async fn all_ids(&self, source: &str) -> Result<Vec<String>>;
}

/// One page of a forum listing.
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    pub posts: Vec<RawPost>,
    /// Pagination cursor for the next page, if any.
    pub after: Option<String>,
}

/// The forum listing API, one call per page. Implementations surface rate
/// limiting as `GroundswellError::RateLimited` so the harvester can rotate
/// credentials.
#[async_trait]
pub trait ForumApi: Send + Sync {
    async fn listing(
        &self,
        credential: &RedditCredential,
        strategy: &SamplingStrategy,
        after: Option<&str>,
    ) -> Result<ListingPage, GroundswellError>;
}

// --- Postgres-backed implementations ---

#[async_trait]
impl DurableCache for groundswell_store::KvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        groundswell_store::KvStore::get(self, key).await
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        groundswell_store::KvStore::get_many(self, keys).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        groundswell_store::KvStore::set(self, key, value, ttl).await
    }

    async fn incr(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64> {
        groundswell_store::KvStore::incr(self, key, delta, ttl).await
    }
}

#[async_trait]
impl SeenStore for groundswell_store::SeenSets {
    async fn add_many(&self, scope: &str, ids: &[String], ttl: Duration) -> Result<Vec<bool>> {
        groundswell_store::SeenSets::add_many(self, scope, ids, ttl).await
    }

    async fn contains_many(&self, scope: &str, ids: &[String]) -> Result<Vec<bool>> {
        groundswell_store::SeenSets::contains_many(self, scope, ids).await
    }
}

#[async_trait]
impl RawPostSink for groundswell_store::PostRepo {
    async fn persist(&self, posts: &[RawPost]) -> Result<u64> {
        self.insert_raw_many(posts).await
    }

    async fn all_ids(&self, source: &str) -> Result<Vec<String>> {
        groundswell_store::PostRepo::all_ids(self, source).await
    }
}
