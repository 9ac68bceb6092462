//! At-most-once guarantee over previously seen post ids.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::Duration;
use tracing::info;

use crate::traits::{RawPostSink, SeenStore};

/// In-memory set front + durable seen-set behind it. The durable add is the
/// single atomic source of truth; the local set only short-circuits ids this
/// process has already confirmed.
pub struct DedupIndex {
    source: String,
    ttl: Duration,
    store: Arc<dyn SeenStore>,
    local: std::sync::Mutex<HashSet<String>>,
}

impl DedupIndex {
    pub fn new(source: impl Into<String>, store: Arc<dyn SeenStore>, ttl_days: i64) -> Self {
        Self {
            source: source.into(),
            ttl: Duration::days(ttl_days),
            store,
            local: std::sync::Mutex::new(HashSet::new()),
        }
    }

    fn scope(&self) -> String {
        format!("seen:{}", self.source)
    }

    /// Seed the local set from the raw-post store in one pass. The durable
    /// set is also topped up so both survive restarts.
    pub async fn warm_start(&self, sink: &dyn RawPostSink) -> Result<usize> {
        let ids = sink.all_ids(&self.source).await?;
        if !ids.is_empty() {
            self.store.add_many(&self.scope(), &ids, self.ttl).await?;
        }
        let count = ids.len();
        let mut local = self.local.lock().expect("dedup lock poisoned");
        local.extend(ids);
        info!(source = self.source.as_str(), seeded = count, "Dedup index warm start");
        Ok(count)
    }

    /// `true` exactly once per id across all workers and time (within TTL).
    pub async fn add(&self, id: &str) -> Result<bool> {
        let flags = self.add_many(&[id.to_string()]).await?;
        Ok(flags.first().copied().unwrap_or(false))
    }

    /// One flag per input id, `true` iff the id was new. Duplicates within
    /// the batch count as new only at their first position.
    pub async fn add_many(&self, ids: &[String]) -> Result<Vec<bool>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        // Collapse batch-internal duplicates and strip locally known ids
        // before touching the durable store.
        let mut to_check: Vec<String> = Vec::new();
        let mut first_position: HashSet<&str> = HashSet::new();
        {
            let local = self.local.lock().expect("dedup lock poisoned");
            for id in ids {
                if !local.contains(id) && first_position.insert(id.as_str()) {
                    to_check.push(id.clone());
                }
            }
        }

        let mut fresh: HashSet<String> = HashSet::new();
        if !to_check.is_empty() {
            let flags = self.store.add_many(&self.scope(), &to_check, self.ttl).await?;
            for (id, was_new) in to_check.into_iter().zip(flags) {
                if was_new {
                    fresh.insert(id);
                }
            }
        }

        let mut local = self.local.lock().expect("dedup lock poisoned");
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            // take() so a duplicate later in the same batch reads false.
            let is_new = fresh.take(id).is_some();
            local.insert(id.clone());
            results.push(is_new);
        }
        Ok(results)
    }

    /// Membership check without mutation, one pipelined multi-exists.
    pub async fn contains_many(&self, ids: &[String]) -> Result<Vec<bool>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let locally_known: Vec<bool> = {
            let local = self.local.lock().expect("dedup lock poisoned");
            ids.iter().map(|id| local.contains(id)).collect()
        };

        let unknown: Vec<String> = ids
            .iter()
            .zip(&locally_known)
            .filter(|(_, known)| !**known)
            .map(|(id, _)| id.clone())
            .collect();

        if unknown.is_empty() {
            return Ok(locally_known);
        }

        let flags = self.store.contains_many(&self.scope(), &unknown).await?;
        let durable: std::collections::HashMap<&str, bool> = unknown
            .iter()
            .map(|s| s.as_str())
            .zip(flags)
            .collect();

        Ok(ids
            .iter()
            .zip(locally_known)
            .map(|(id, known)| known || durable.get(id.as_str()).copied().unwrap_or(false))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use groundswell_common::RawPost;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemorySeen {
        sets: Mutex<HashMap<String, HashSet<String>>>,
    }

    #[async_trait]
    impl SeenStore for MemorySeen {
        async fn add_many(
            &self,
            scope: &str,
            ids: &[String],
            _ttl: Duration,
        ) -> Result<Vec<bool>> {
            let mut sets = self.sets.lock().unwrap();
            let set = sets.entry(scope.to_string()).or_default();
            Ok(ids.iter().map(|id| set.insert(id.clone())).collect())
        }

        async fn contains_many(&self, scope: &str, ids: &[String]) -> Result<Vec<bool>> {
            let sets = self.sets.lock().unwrap();
            let set = sets.get(scope);
            Ok(ids
                .iter()
                .map(|id| set.map(|s| s.contains(id)).unwrap_or(false))
                .collect())
        }
    }

    struct MemorySink(Vec<String>);

    #[async_trait]
    impl RawPostSink for MemorySink {
        async fn persist(&self, _posts: &[RawPost]) -> Result<u64> {
            Ok(0)
        }

        async fn all_ids(&self, _source: &str) -> Result<Vec<String>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn add_returns_true_exactly_once() {
        let index = DedupIndex::new("reddit", Arc::new(MemorySeen::default()), 90);
        assert!(index.add("t3_a").await.unwrap());
        assert!(!index.add("t3_a").await.unwrap());
    }

    #[tokio::test]
    async fn batch_internal_duplicates_count_once() {
        let index = DedupIndex::new("reddit", Arc::new(MemorySeen::default()), 90);
        let ids: Vec<String> = vec!["t3_a".into(), "t3_b".into(), "t3_a".into()];
        let flags = index.add_many(&ids).await.unwrap();
        assert_eq!(flags, vec![true, true, false]);
    }

    #[tokio::test]
    async fn warm_start_seeds_from_raw_store() {
        let index = DedupIndex::new("reddit", Arc::new(MemorySeen::default()), 90);
        let sink = MemorySink(vec!["t3_x".into(), "t3_y".into()]);
        assert_eq!(index.warm_start(&sink).await.unwrap(), 2);
        assert!(!index.add("t3_x").await.unwrap());
        assert!(index.add("t3_z").await.unwrap());
    }

    #[tokio::test]
    async fn contains_many_reports_membership() {
        let index = DedupIndex::new("reddit", Arc::new(MemorySeen::default()), 90);
        index.add("t3_a").await.unwrap();
        let flags = index
            .contains_many(&["t3_a".to_string(), "t3_b".to_string()])
            .await
            .unwrap();
        assert_eq!(flags, vec![true, false]);
    }

    #[tokio::test]
    async fn durable_store_is_shared_across_instances() {
        let store = Arc::new(MemorySeen::default());
        let first = DedupIndex::new("reddit", store.clone(), 90);
        assert!(first.add("t3_a").await.unwrap());

        // A fresh process with an empty local set still sees the id.
        let second = DedupIndex::new("reddit", store, 90);
        assert!(!second.add("t3_a").await.unwrap());
    }
}
