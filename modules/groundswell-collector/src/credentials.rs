//! Round-robin credential rotation with durable cooldowns.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use groundswell_common::RedditCredential;

use crate::traits::DurableCache;

/// Round-robin selector over API credentials. Cooldowns are mirrored into
/// the durable cache (`cooldown:<i>`) so a fresh process respects windows
/// set by a previous one.
pub struct CredentialPool {
    credentials: Vec<RedditCredential>,
    cache: Arc<dyn DurableCache>,
    state: Mutex<PoolState>,
}

struct PoolState {
    /// Unix-millis expiry per credential; `<= now` means usable.
    cooldown_until: Vec<i64>,
    last_index: usize,
}

impl CredentialPool {
    pub fn new(credentials: Vec<RedditCredential>, cache: Arc<dyn DurableCache>) -> Self {
        let n = credentials.len();
        Self {
            credentials,
            cache,
            state: Mutex::new(PoolState {
                cooldown_until: vec![0; n],
                last_index: n.saturating_sub(1),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Hand out the next usable credential, round-robin from the last index.
    /// If every credential is cooling, sleeps until the earliest expiry and
    /// then advances anyway.
    pub async fn next(&self) -> Result<(usize, RedditCredential)> {
        anyhow::ensure!(!self.credentials.is_empty(), "credential pool is empty");
        let n = self.credentials.len();

        loop {
            let (pick, min_wait_ms) = {
                let mut state = self.state.lock().await;
                self.refresh_cooldowns(&mut state).await?;
                let now = Utc::now().timestamp_millis();

                let mut pick = None;
                for step in 1..=n {
                    let i = (state.last_index + step) % n;
                    if state.cooldown_until[i] <= now {
                        pick = Some(i);
                        break;
                    }
                }

                match pick {
                    Some(i) => {
                        state.last_index = i;
                        (Some(i), 0)
                    }
                    None => {
                        let min_expiry =
                            state.cooldown_until.iter().copied().min().unwrap_or(now);
                        (None, (min_expiry - now).max(0))
                    }
                }
            };

            if let Some(i) = pick {
                return Ok((i, self.credentials[i].clone()));
            }

            debug!(wait_ms = min_wait_ms, "All credentials cooling, parking");
            tokio::time::sleep(Duration::from_millis(min_wait_ms as u64 + 50)).await;

            // Whatever expires first goes next; advance round-robin past it.
            let mut state = self.state.lock().await;
            state.last_index = (state.last_index + 1) % n;
        }
    }

    /// Put a credential on cooldown, locally and durably (TTL ≈ duration).
    pub async fn cooldown(&self, index: usize, duration: Duration) -> Result<()> {
        let until = Utc::now().timestamp_millis() + duration.as_millis() as i64;
        {
            let mut state = self.state.lock().await;
            if index < state.cooldown_until.len() {
                state.cooldown_until[index] = until;
            }
        }
        self.cache
            .set(
                &format!("cooldown:{index}"),
                &until.to_string(),
                Some(chrono::Duration::milliseconds(duration.as_millis() as i64)),
            )
            .await?;

        info!(credential = index, cooldown_ms = duration.as_millis() as u64, "Credential cooling");
        Ok(())
    }

    /// Pull the durable cooldown keys into the local vector. A missing or
    /// unparsable key leaves the local value in place.
    async fn refresh_cooldowns(&self, state: &mut PoolState) -> Result<()> {
        let keys: Vec<String> = (0..self.credentials.len())
            .map(|i| format!("cooldown:{i}"))
            .collect();
        let values = self.cache.get_many(&keys).await?;
        for (i, value) in values.into_iter().enumerate() {
            if let Some(until) = value.and_then(|v| v.parse::<i64>().ok()) {
                state.cooldown_until[i] = state.cooldown_until[i].max(until);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct MemoryCache {
        entries: StdMutex<HashMap<String, String>>,
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

        async fn set(
            &self,
            key: &str,
            value: &str,
            _ttl: Option<chrono::Duration>,
        ) -> Result<()> {
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

    fn credential(name: &str) -> RedditCredential {
        RedditCredential {
            client_id: format!("{name}-id"),
            client_secret: "secret".into(),
            username: name.to_string(),
            password: "pw".into(),
        }
    }

    #[tokio::test]
    async fn hands_out_credentials_round_robin() {
        let pool = CredentialPool::new(
            vec![credential("a"), credential("b"), credential("c")],
            Arc::new(MemoryCache::default()),
        );

        let (i1, _) = pool.next().await.unwrap();
        let (i2, _) = pool.next().await.unwrap();
        let (i3, _) = pool.next().await.unwrap();
        let (i4, _) = pool.next().await.unwrap();

        assert_eq!((i1, i2, i3), (0, 1, 2));
        assert_eq!(i4, 0);
    }

    #[tokio::test]
    async fn skips_cooling_credentials() {
        let pool = CredentialPool::new(
            vec![credential("a"), credential("b")],
            Arc::new(MemoryCache::default()),
        );

        let (first, _) = pool.next().await.unwrap();
        assert_eq!(first, 0);
        pool.cooldown(1, Duration::from_secs(60)).await.unwrap();

        // Index 1 is cooling, so rotation lands back on 0.
        let (next, _) = pool.next().await.unwrap();
        assert_eq!(next, 0);
    }

    #[tokio::test]
    async fn reads_durable_cooldowns_from_a_previous_process() {
        let cache = Arc::new(MemoryCache::default());
        let future = Utc::now().timestamp_millis() + 60_000;
        cache.set("cooldown:0", &future.to_string(), None).await.unwrap();

        let pool = CredentialPool::new(
            vec![credential("a"), credential("b")],
            cache.clone(),
        );

        let (picked, _) = pool.next().await.unwrap();
        assert_eq!(picked, 1);
    }

    #[tokio::test]
    async fn parks_until_earliest_expiry_when_all_cooling() {
        let pool = CredentialPool::new(
            vec![credential("a"), credential("b")],
            Arc::new(MemoryCache::default()),
        );
        pool.cooldown(0, Duration::from_millis(80)).await.unwrap();
        pool.cooldown(1, Duration::from_millis(200)).await.unwrap();

        let start = std::time::Instant::now();
        let (_, _) = pool.next().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(60));
    }
}
