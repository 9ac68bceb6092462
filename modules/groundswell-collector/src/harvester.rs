//! Strategy execution against the forum API, with credential rotation and
//! rate gating.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

use groundswell_common::{GroundswellError, RawPost, RateGate};

use crate::credentials::CredentialPool;
use crate::planner::{SamplingStrategy, SortMethod};
use crate::traits::ForumApi;
use crate::watermark::WatermarkStore;

/// Cooldown applied to a credential that hit the rate limit.
const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(60);

/// Result of running one sampling strategy.
#[derive(Debug, Default)]
pub struct StrategyResult {
    pub posts: Vec<RawPost>,
    pub api_calls: u64,
    pub rate_limit_hits: u64,
}

/// Options for the continuous streaming mode.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Total wall-clock budget for the stream.
    pub time_budget: Duration,
    /// Sleep between outer polling iterations.
    pub poll_interval: Duration,
    /// Listing page size.
    pub page_limit: u32,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            time_budget: Duration::from_secs(300),
            poll_interval: Duration::from_secs(15),
            page_limit: 100,
        }
    }
}

pub struct Harvester {
    api: Arc<dyn ForumApi>,
    credentials: Arc<CredentialPool>,
    api_bucket: Arc<RateGate>,
    cancel: Arc<AtomicBool>,
}

impl Harvester {
    pub fn new(
        api: Arc<dyn ForumApi>,
        credentials: Arc<CredentialPool>,
        api_bucket: Arc<RateGate>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            api,
            credentials,
            api_bucket,
            cancel,
        }
    }

    /// Execute one strategy. A rate-limited credential is cooled for 60s and
    /// the call retried with the next credential, up to `n - 1` swaps; any
    /// other error (or exhaustion) yields an empty result.
    pub async fn run_strategy(&self, strategy: &SamplingStrategy) -> StrategyResult {
        let mut result = StrategyResult::default();
        let attempts = self.credentials.len().max(1);

        for attempt in 0..attempts {
            if self.cancel.load(Ordering::Relaxed) {
                return result;
            }

            let (index, credential) = match self.credentials.next().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "No credential available");
                    return result;
                }
            };

            if self
                .api_bucket
                .acquire_cancellable(1, &self.cancel)
                .await
                .is_err()
            {
                return result;
            }

            result.api_calls += 1;
            match self.api.listing(&credential, strategy, None).await {
                Ok(page) => {
                    result.posts = page.posts;
                    return result;
                }
                Err(GroundswellError::RateLimited) => {
                    result.rate_limit_hits += 1;
                    if let Err(e) = self.credentials.cooldown(index, RATE_LIMIT_COOLDOWN).await {
                        warn!(error = %e, "Failed to persist cooldown");
                    }
                    if attempt + 1 < attempts {
                        continue;
                    }
                    warn!(
                        sub_source = strategy.sub_source.as_str(),
                        "All credentials rate limited, abandoning strategy"
                    );
                }
                Err(e) => {
                    warn!(
                        sub_source = strategy.sub_source.as_str(),
                        sort = strategy.sort.as_str(),
                        error = %e,
                        "Listing failed"
                    );
                }
            }
            return result;
        }

        result
    }

    /// Continuous streaming of new posts for one sub-source.
    ///
    /// Within the time budget, repeatedly paginates the `new` listing via the
    /// `after` cursor. The watermark is read once per outer iteration;
    /// pagination halts early once a page's oldest post falls at or below it.
    /// Batches are emitted through a bounded channel (one in flight), so the
    /// consumer provides backpressure and decides persistence.
    pub fn stream_new_posts(
        self: Arc<Self>,
        sub_source: String,
        watermarks: Arc<WatermarkStore>,
        options: StreamOptions,
    ) -> mpsc::Receiver<Vec<RawPost>> {
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            let deadline = Instant::now() + options.time_budget;

            'outer: while Instant::now() < deadline && !self.cancel.load(Ordering::Relaxed) {
                let watermark = match watermarks.get(&sub_source).await {
                    Ok(w) => w,
                    Err(e) => {
                        warn!(sub_source = sub_source.as_str(), error = %e, "Watermark read failed");
                        break;
                    }
                };

                let strategy = SamplingStrategy {
                    sub_source: sub_source.clone(),
                    sort: SortMethod::New,
                    time_filter: None,
                    limit: options.page_limit,
                    before: None,
                    after_ts: None,
                    offset: None,
                };

                let mut cursor: Option<String> = None;
                let mut max_seen = watermark;
                loop {
                    if Instant::now() >= deadline || self.cancel.load(Ordering::Relaxed) {
                        break 'outer;
                    }

                    let page = {
                        let (index, credential) = match self.credentials.next().await {
                            Ok(pair) => pair,
                            Err(e) => {
                                warn!(error = %e, "No credential available");
                                break 'outer;
                            }
                        };
                        if self
                            .api_bucket
                            .acquire_cancellable(1, &self.cancel)
                            .await
                            .is_err()
                        {
                            break 'outer;
                        }
                        match self.api.listing(&credential, &strategy, cursor.as_deref()).await {
                            Ok(page) => page,
                            Err(GroundswellError::RateLimited) => {
                                let _ = self.credentials.cooldown(index, RATE_LIMIT_COOLDOWN).await;
                                continue;
                            }
                            Err(e) => {
                                warn!(sub_source = sub_source.as_str(), error = %e, "Stream page failed");
                                break;
                            }
                        }
                    };

                    if page.posts.is_empty() {
                        break;
                    }

                    let oldest = page.posts.iter().map(|p| p.created_at).min().unwrap_or(0);

                    // Filter against the watermark read at the start of this
                    // iteration; advancing per page would drop the older pages
                    // of the same sweep.
                    let batch: Vec<RawPost> = page
                        .posts
                        .into_iter()
                        .filter(|p| p.created_at > watermark)
                        .collect();
                    if let Some(batch_max) = batch.iter().map(|p| p.created_at).max() {
                        max_seen = max_seen.max(batch_max);
                    }

                    if !batch.is_empty() && tx.send(batch).await.is_err() {
                        // Consumer dropped the stream.
                        break 'outer;
                    }

                    // Reached history we have already harvested.
                    if oldest <= watermark {
                        break;
                    }

                    cursor = match page.after {
                        Some(c) => Some(c),
                        None => break,
                    };
                }

                if max_seen > watermark {
                    if let Err(e) = watermarks.advance(&sub_source, max_seen).await {
                        warn!(sub_source = sub_source.as_str(), error = %e, "Watermark advance failed");
                    }
                }

                tokio::time::sleep(options.poll_interval.min(
                    deadline.saturating_duration_since(Instant::now()),
                ))
                .await;
            }

            info!(sub_source = sub_source.as_str(), "Stream finished");
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{DurableCache, ListingPage};
    use anyhow::Result;
    use async_trait::async_trait;
    use groundswell_common::RedditCredential;
    use std::collections::HashMap;
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

        async fn set(&self, key: &str, value: &str, _ttl: Option<chrono::Duration>) -> Result<()> {
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn incr(&self, key: &str, delta: i64, _ttl: chrono::Duration) -> Result<i64> {
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

    fn credential(name: &str) -> RedditCredential {
        RedditCredential {
            client_id: format!("{name}-id"),
            client_secret: "secret".into(),
            username: name.to_string(),
            password: "pw".into(),
        }
    }

    /// Scripted API: answers by credential username, recording each call.
    struct ScriptedApi {
        responses: HashMap<String, Result<Vec<RawPost>, ()>>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ForumApi for ScriptedApi {
        async fn listing(
            &self,
            credential: &RedditCredential,
            _strategy: &SamplingStrategy,
            _after: Option<&str>,
        ) -> Result<ListingPage, GroundswellError> {
            self.calls.lock().unwrap().push(credential.username.clone());
            match self.responses.get(&credential.username) {
                Some(Ok(posts)) => Ok(ListingPage {
                    posts: posts.clone(),
                    after: None,
                }),
                Some(Err(())) => Err(GroundswellError::RateLimited),
                None => Err(GroundswellError::SourceApi("unknown credential".into())),
            }
        }
    }

    fn harvester(api: Arc<dyn ForumApi>, creds: Vec<RedditCredential>) -> Harvester {
        let cache = Arc::new(MemoryCache::default());
        Harvester::new(
            api,
            Arc::new(CredentialPool::new(creds, cache)),
            Arc::new(RateGate::new(100, 1000.0)),
            Arc::new(AtomicBool::new(false)),
        )
    }

    fn strategy() -> SamplingStrategy {
        SamplingStrategy {
            sub_source: "startups".into(),
            sort: SortMethod::New,
            time_filter: None,
            limit: 25,
            before: None,
            after_ts: None,
            offset: None,
        }
    }

    #[tokio::test]
    async fn rate_limited_credential_is_cooled_and_swapped() {
        let mut responses = HashMap::new();
        responses.insert("a".to_string(), Err(()));
        responses.insert("b".to_string(), Ok(vec![post("t3_x", 100)]));
        let api = Arc::new(ScriptedApi {
            responses,
            calls: Mutex::new(Vec::new()),
        });

        let h = harvester(api.clone(), vec![credential("a"), credential("b")]);
        let result = h.run_strategy(&strategy()).await;

        assert_eq!(result.posts.len(), 1);
        assert_eq!(result.posts[0].id, "t3_x");
        assert_eq!(result.rate_limit_hits, 1);
        assert_eq!(result.api_calls, 2);
        assert_eq!(*api.calls.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn non_rate_limit_error_returns_empty_without_retry() {
        let api = Arc::new(ScriptedApi {
            responses: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        });

        let h = harvester(api.clone(), vec![credential("a"), credential("b")]);
        let result = h.run_strategy(&strategy()).await;

        assert!(result.posts.is_empty());
        assert_eq!(result.api_calls, 1);
        assert_eq!(api.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausting_every_credential_returns_empty() {
        let mut responses = HashMap::new();
        responses.insert("a".to_string(), Err(()));
        responses.insert("b".to_string(), Err(()));
        let api = Arc::new(ScriptedApi {
            responses,
            calls: Mutex::new(Vec::new()),
        });

        let h = harvester(api, vec![credential("a"), credential("b")]);
        let result = h.run_strategy(&strategy()).await;

        assert!(result.posts.is_empty());
        assert_eq!(result.rate_limit_hits, 2);
    }

    /// Pages newest-first; second call serves an older page, then history
    /// below the watermark.
    struct PagedApi {
        pages: Mutex<Vec<ListingPage>>,
    }

    #[async_trait]
    impl ForumApi for PagedApi {
        async fn listing(
            &self,
            _credential: &RedditCredential,
            _strategy: &SamplingStrategy,
            _after: Option<&str>,
        ) -> Result<ListingPage, GroundswellError> {
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                Ok(ListingPage::default())
            } else {
                Ok(pages.remove(0))
            }
        }
    }

    #[tokio::test]
    async fn stream_halts_at_watermark_and_advances_it() {
        let api = Arc::new(PagedApi {
            pages: Mutex::new(vec![
                ListingPage {
                    posts: vec![post("t3_new", 2000), post("t3_mid", 1500)],
                    after: Some("c1".into()),
                },
                ListingPage {
                    posts: vec![post("t3_old", 900)],
                    after: Some("c2".into()),
                },
            ]),
        });

        let cache = Arc::new(MemoryCache::default());
        let watermarks = Arc::new(WatermarkStore::new(cache.clone()));
        watermarks.advance("startups", 1000).await.unwrap();

        let h = Arc::new(Harvester::new(
            api,
            Arc::new(CredentialPool::new(vec![credential("a")], cache)),
            Arc::new(RateGate::new(100, 1000.0)),
            Arc::new(AtomicBool::new(false)),
        ));

        let mut rx = h.stream_new_posts(
            "startups".to_string(),
            watermarks.clone(),
            StreamOptions {
                time_budget: Duration::from_millis(400),
                poll_interval: Duration::from_millis(500),
                page_limit: 2,
            },
        );

        let first = rx.recv().await.expect("one batch expected");
        assert_eq!(first.len(), 2);

        // Second page is entirely below the watermark: nothing more arrives.
        assert!(rx.recv().await.is_none());
        assert_eq!(watermarks.get("startups").await.unwrap(), 2000);
    }
}
