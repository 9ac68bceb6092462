//! Per-sub-source high-watermark filtering.

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use groundswell_common::RawPost;

use crate::traits::DurableCache;

/// Monotonic `last_fetch:<sub_source>` watermarks. Each sub-source has a
/// single collector writing it, so advance is read-max-write against the
/// durable cache.
pub struct WatermarkStore {
    cache: Arc<dyn DurableCache>,
}

impl WatermarkStore {
    pub fn new(cache: Arc<dyn DurableCache>) -> Self {
        Self { cache }
    }

    fn key(sub_source: &str) -> String {
        format!("last_fetch:{sub_source}")
    }

    /// Current watermark; 0 when the sub-source has never been fetched.
    pub async fn get(&self, sub_source: &str) -> Result<i64> {
        Ok(self
            .cache
            .get(&Self::key(sub_source))
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    /// Advance the watermark, never letting it move backwards.
    pub async fn advance(&self, sub_source: &str, created_at: i64) -> Result<i64> {
        let current = self.get(sub_source).await?;
        let next = current.max(created_at);
        if next > current {
            self.cache
                .set(&Self::key(sub_source), &next.to_string(), None)
                .await?;
        }
        Ok(next)
    }

    /// Keep only posts newer than the watermark, then advance it to the max
    /// kept `created_at`. Posts at or below the watermark are never
    /// re-emitted.
    pub async fn filter_new(&self, sub_source: &str, posts: Vec<RawPost>) -> Result<Vec<RawPost>> {
        let watermark = self.get(sub_source).await?;
        let fresh: Vec<RawPost> = posts
            .into_iter()
            .filter(|p| p.created_at > watermark)
            .collect();

        if let Some(max_created) = fresh.iter().map(|p| p.created_at).max() {
            self.advance(sub_source, max_created).await?;
        }

        debug!(
            sub_source,
            watermark,
            kept = fresh.len(),
            "Watermark filter"
        );
        Ok(fresh)
    }
}
