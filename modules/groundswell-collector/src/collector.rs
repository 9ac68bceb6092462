//! One-shot collector run: plan → harvest → dedup → watermark filter →
//! persist.

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use tracing::info;

use crate::dedup::DedupIndex;
use crate::harvester::Harvester;
use crate::planner::{build_plan, PlanOptions};
use crate::traits::{DurableCache, RawPostSink};
use crate::watermark::WatermarkStore;

const THROUGHPUT_KEY: &str = "posts:fetched:current_minute";

#[derive(Debug, Default)]
pub struct RunStats {
    pub strategies: usize,
    pub api_calls: u64,
    pub rate_limit_hits: u64,
    pub fetched: u64,
    pub unique: u64,
    pub fresh: u64,
    pub persisted: u64,
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} strategies, {} api calls ({} rate limited), {} fetched, {} unique, {} fresh, {} persisted",
            self.strategies,
            self.api_calls,
            self.rate_limit_hits,
            self.fetched,
            self.unique,
            self.fresh,
            self.persisted
        )
    }
}

pub struct Collector {
    harvester: Arc<Harvester>,
    dedup: Arc<DedupIndex>,
    watermarks: Arc<WatermarkStore>,
    sink: Arc<dyn RawPostSink>,
    cache: Arc<dyn DurableCache>,
    target_count: usize,
}

impl Collector {
    pub fn new(
        harvester: Arc<Harvester>,
        dedup: Arc<DedupIndex>,
        watermarks: Arc<WatermarkStore>,
        sink: Arc<dyn RawPostSink>,
        cache: Arc<dyn DurableCache>,
        target_count: usize,
    ) -> Self {
        Self {
            harvester,
            dedup,
            watermarks,
            sink,
            cache,
            target_count,
        }
    }

    /// Run one harvest pass over the given sub-sources.
    pub async fn run(&self, sub_sources: &[String]) -> Result<RunStats> {
        let plan = build_plan(
            sub_sources,
            self.target_count,
            Utc::now().timestamp(),
            PlanOptions::default(),
        );
        info!(strategies = plan.len(), "Sampling plan built");

        let mut stats = RunStats {
            strategies: plan.len(),
            ..Default::default()
        };

        for strategy in &plan {
            let result = self.harvester.run_strategy(strategy).await;
            stats.api_calls += result.api_calls;
            stats.rate_limit_hits += result.rate_limit_hits;
            stats.fetched += result.posts.len() as u64;

            if result.posts.is_empty() {
                continue;
            }

            // Drop everything the durable set has already seen.
            let ids: Vec<String> = result.posts.iter().map(|p| p.id.clone()).collect();
            let fresh_flags = self.dedup.add_many(&ids).await?;
            let unique: Vec<_> = result
                .posts
                .into_iter()
                .zip(fresh_flags)
                .filter(|(_, fresh)| *fresh)
                .map(|(post, _)| post)
                .collect();
            stats.unique += unique.len() as u64;

            if unique.is_empty() {
                continue;
            }

            let fresh = self
                .watermarks
                .filter_new(&strategy.sub_source, unique)
                .await?;
            stats.fresh += fresh.len() as u64;

            if fresh.is_empty() {
                continue;
            }

            let persisted = self.sink.persist(&fresh).await?;
            stats.persisted += persisted;

            self.cache
                .incr(THROUGHPUT_KEY, persisted as i64, Duration::seconds(60))
                .await?;
        }

        info!("Collector run complete. {stats}");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialPool;
    use crate::planner::SamplingStrategy;
    use crate::traits::{ForumApi, ListingPage, SeenStore};
    use async_trait::async_trait;
    use groundswell_common::{GroundswellError, RateGate, RawPost, RedditCredential};
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryCache {
        entries: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl DurableCache for MemoryCache {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }

        async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
            let entries = self.entries.lock().unwrap();
            Ok(keys.iter().map(|k| entries.get(k).cloned()).collect())
        }

        async fn set(&self, key: &str, value: &str, _ttl: Option<Duration>) -> Result<()> {
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn incr(&self, key: &str, delta: i64, _ttl: Duration) -> Result<i64> {
            let mut entries = self.entries.lock().unwrap();
            let next = entries
                .get(key)
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0)
                + delta;
            entries.insert(key.to_string(), next.to_string());
            Ok(next)
        }
    }

    #[derive(Default)]
    struct MemorySeen {
        sets: Mutex<HashMap<String, HashSet<String>>>,
    }

    #[async_trait]
    impl SeenStore for MemorySeen {
        async fn add_many(&self, scope: &str, ids: &[String], _ttl: Duration) -> Result<Vec<bool>> {
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

    #[derive(Default)]
    struct MemorySink {
        posts: Mutex<Vec<RawPost>>,
    }

    #[async_trait]
    impl RawPostSink for MemorySink {
        async fn persist(&self, posts: &[RawPost]) -> Result<u64> {
            let mut stored = self.posts.lock().unwrap();
            let mut inserted = 0;
            for post in posts {
                if !stored.iter().any(|p| p.id == post.id) {
                    stored.push(post.clone());
                    inserted += 1;
                }
            }
            Ok(inserted)
        }

        async fn all_ids(&self, _source: &str) -> Result<Vec<String>> {
            Ok(self.posts.lock().unwrap().iter().map(|p| p.id.clone()).collect())
        }
    }

    /// Serves the same two posts for every strategy.
    struct RepeatingApi {
        posts: Vec<RawPost>,
    }

    #[async_trait]
    impl ForumApi for RepeatingApi {
        async fn listing(
            &self,
            _credential: &RedditCredential,
            _strategy: &SamplingStrategy,
            _after: Option<&str>,
        ) -> Result<ListingPage, GroundswellError> {
            Ok(ListingPage {
                posts: self.posts.clone(),
                after: None,
            })
        }
    }

    fn post(id: &str, created_at: i64) -> RawPost {
        RawPost {
            id: id.to_string(),
            source: "reddit".into(),
            title: "t".into(),
            body: "b".into(),
            author: "a".into(),
            score: 0,
            url: String::new(),
            sub_source: "startups".into(),
            created_at,
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn run_persists_each_unique_post_once() {
        let cache: Arc<dyn DurableCache> = Arc::new(MemoryCache::default());
        let sink = Arc::new(MemorySink::default());
        let api = Arc::new(RepeatingApi {
            posts: vec![post("t3_a", 100), post("t3_b", 200)],
        });

        let harvester = Arc::new(Harvester::new(
            api,
            Arc::new(CredentialPool::new(
                vec![RedditCredential {
                    client_id: "id".into(),
                    client_secret: "s".into(),
                    username: "u".into(),
                    password: "p".into(),
                }],
                cache.clone(),
            )),
            Arc::new(RateGate::new(1000, 10_000.0)),
            Arc::new(AtomicBool::new(false)),
        ));

        let collector = Collector::new(
            harvester,
            Arc::new(DedupIndex::new("reddit", Arc::new(MemorySeen::default()), 90)),
            Arc::new(WatermarkStore::new(cache.clone())),
            sink.clone(),
            cache.clone(),
            100,
        );

        let stats = collector.run(&["startups".to_string()]).await.unwrap();

        // Every strategy returned the same two posts; dedup collapses them.
        assert!(stats.fetched > 2);
        assert_eq!(stats.unique, 2);
        assert_eq!(stats.persisted, 2);
        assert_eq!(sink.posts.lock().unwrap().len(), 2);

        let counter = cache.get(THROUGHPUT_KEY).await.unwrap();
        assert_eq!(counter.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let cache: Arc<dyn DurableCache> = Arc::new(MemoryCache::default());
        let sink = Arc::new(MemorySink::default());
        let seen = Arc::new(MemorySeen::default());
        let api = Arc::new(RepeatingApi {
            posts: vec![post("t3_a", 100)],
        });

        let make_collector = |dedup: Arc<DedupIndex>| {
            let harvester = Arc::new(Harvester::new(
                api.clone(),
                Arc::new(CredentialPool::new(
                    vec![RedditCredential {
                        client_id: "id".into(),
                        client_secret: "s".into(),
                        username: "u".into(),
                        password: "p".into(),
                    }],
                    cache.clone(),
                )),
                Arc::new(RateGate::new(1000, 10_000.0)),
                Arc::new(AtomicBool::new(false)),
            ));
            Collector::new(
                harvester,
                dedup,
                Arc::new(WatermarkStore::new(cache.clone())),
                sink.clone(),
                cache.clone(),
                100,
            )
        };

        let first = make_collector(Arc::new(DedupIndex::new("reddit", seen.clone(), 90)));
        first.run(&["startups".to_string()]).await.unwrap();

        // Fresh process: empty local set, same durable set.
        let second = make_collector(Arc::new(DedupIndex::new("reddit", seen, 90)));
        let stats = second.run(&["startups".to_string()]).await.unwrap();

        assert_eq!(stats.unique, 0);
        assert_eq!(stats.persisted, 0);
        assert_eq!(sink.posts.lock().unwrap().len(), 1);
    }
}
