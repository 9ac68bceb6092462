//! Queue depth monitoring and refill from the raw-post store.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use groundswell_common::RawPost;

use crate::traits::{JobBoard, PostStore};

/// Refill when `waiting + active` drops to this.
const LOW_THRESHOLD: i64 = 3;

/// Candidates pulled per refill.
const REFILL_BATCH: i64 = 25;

pub struct QueueRefiller {
    queue: Arc<dyn JobBoard>,
    posts: Arc<dyn PostStore>,
    low_threshold: i64,
    batch_size: i64,
}

impl QueueRefiller {
    pub fn new(queue: Arc<dyn JobBoard>, posts: Arc<dyn PostStore>) -> Self {
        Self {
            queue,
            posts,
            low_threshold: LOW_THRESHOLD,
            batch_size: REFILL_BATCH,
        }
    }

    pub fn with_thresholds(mut self, low_threshold: i64, batch_size: i64) -> Self {
        self.low_threshold = low_threshold;
        self.batch_size = batch_size;
        self
    }

    /// Top the queue up if it has drained below the low-water mark. Returns
    /// how many posts were enqueued.
    pub async fn maybe_refill(&self) -> Result<usize> {
        let counts = self.queue.counts().await?;
        if counts.waiting + counts.active > self.low_threshold {
            return Ok(0);
        }

        let candidates = self.posts.fetch_unprocessed(self.batch_size).await?;
        if candidates.is_empty() {
            debug!("Queue low but no unprocessed posts to enqueue");
            return Ok(0);
        }

        let in_flight: HashSet<String> =
            self.queue.in_flight_post_ids().await?.into_iter().collect();

        let fresh: Vec<RawPost> = candidates
            .into_iter()
            .filter(|p| !in_flight.contains(&p.id))
            .map(normalize_author)
            .collect();

        if fresh.is_empty() {
            return Ok(0);
        }

        let enqueued = self.queue.enqueue_bulk(&fresh).await?;
        info!(enqueued, "Queue refilled");
        Ok(enqueued)
    }
}

/// Some ingest paths store the author as an object (`{"name": "..."}`) in
/// the metadata; flatten it into the author field.
fn normalize_author(mut post: RawPost) -> RawPost {
    if post.author.is_empty() {
        if let Some(name) = post
            .metadata
            .get("author")
            .and_then(|a| a.get("name").or(Some(a)))
            .and_then(|v| v.as_str())
        {
            post.author = name.to_string();
        }
    }
    post
}
