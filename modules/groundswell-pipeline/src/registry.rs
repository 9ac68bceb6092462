//! Cluster registry: nearest-centroid lookup and incremental updates.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use uuid::Uuid;

use crate::traits::ClusterStore;

/// Give up on compare-and-set after this many conflicting writers.
const MAX_CAS_ATTEMPTS: u32 = 5;

/// How many words of the hint make it into a generated cluster name.
const NAME_WORDS: usize = 4;

#[derive(Debug, Clone)]
pub struct Assignment {
    pub cluster_id: i64,
    pub created: bool,
    pub similarity: f64,
}

pub struct ClusterRegistry {
    store: Arc<dyn ClusterStore>,
    threshold: f64,
}

impl ClusterRegistry {
    pub fn new(store: Arc<dyn ClusterStore>, threshold: f64) -> Self {
        Self { store, threshold }
    }

    /// Assign an embedding to its nearest cluster (similarity >= threshold),
    /// updating the centroid incrementally, or create a fresh single-member
    /// cluster when nothing is close enough.
    ///
    /// The centroid update is a compare-and-set on `member_count`; a lost
    /// race refetches and recomputes, so concurrent assignments to the same
    /// cluster never drop an embedding from the mean.
    pub async fn assign(
        &self,
        embedding: &[f32],
        category_id: Option<i64>,
        name_hint: &str,
    ) -> Result<Assignment> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(hit) = self.store.find_nearest(embedding, self.threshold).await? else {
                break;
            };

            let updated = incremental_centroid(&hit.centroid, hit.member_count, embedding);
            if self
                .store
                .try_update_centroid(hit.id, &updated, hit.member_count)
                .await?
            {
                return Ok(Assignment {
                    cluster_id: hit.id,
                    created: false,
                    similarity: hit.similarity,
                });
            }
            warn!(cluster_id = hit.id, "Centroid CAS lost, retrying");
        }

        let name = short_name(name_hint);
        let cluster_id = self.store.create(&name, embedding, category_id).await?;
        info!(cluster_id, name = name.as_str(), "Created cluster");
        Ok(Assignment {
            cluster_id,
            created: true,
            similarity: 1.0,
        })
    }
}

/// `c' = (c * m + e) / (m + 1)`, accumulated in f64.
pub fn incremental_centroid(centroid: &[f32], member_count: i64, embedding: &[f32]) -> Vec<f32> {
    let m = member_count as f64;
    centroid
        .iter()
        .zip(embedding.iter())
        .map(|(c, e)| (((*c as f64) * m + *e as f64) / (m + 1.0)) as f32)
        .collect()
}

/// Cosine similarity with f64 accumulation.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0f64;
    let mut norm_a = 0f64;
    let mut norm_b = 0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += *x as f64 * *y as f64;
        norm_a += *x as f64 * *x as f64;
        norm_b += *y as f64 * *y as f64;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Short auto-generated cluster name from the first few hint words.
fn short_name(hint: &str) -> String {
    let words: Vec<&str> = hint.split_whitespace().take(NAME_WORDS).collect();
    if words.is_empty() {
        let id = Uuid::new_v4().simple().to_string();
        format!("cluster-{}", &id[..8])
    } else {
        words.join(" ").to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryClusterStore;

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    #[tokio::test]
    async fn empty_registry_creates_singleton_cluster() {
        let store = Arc::new(MemoryClusterStore::default());
        let registry = ClusterRegistry::new(store.clone(), 0.7);

        let assignment = registry.assign(&unit(8, 0), None, "leaky faucet").await.unwrap();
        assert!(assignment.created);

        let cluster = store.get(assignment.cluster_id).await.unwrap().unwrap();
        assert_eq!(cluster.member_count, 1);
        assert_eq!(cluster.name, "leaky faucet");
        assert_eq!(cluster.centroid, unit(8, 0));
    }

    #[tokio::test]
    async fn near_embedding_joins_and_updates_centroid() {
        let store = Arc::new(MemoryClusterStore::default());
        let registry = ClusterRegistry::new(store.clone(), 0.7);

        let first = registry.assign(&unit(4, 0), None, "a").await.unwrap();
        let mut close = unit(4, 0);
        close[1] = 0.1;
        let second = registry.assign(&close, None, "b").await.unwrap();

        assert!(!second.created);
        assert_eq!(second.cluster_id, first.cluster_id);

        let cluster = store.get(first.cluster_id).await.unwrap().unwrap();
        assert_eq!(cluster.member_count, 2);
        // Mean of (1,0,..) and (1,0.1,..).
        assert!((cluster.centroid[0] - 1.0).abs() < 1e-6);
        assert!((cluster.centroid[1] - 0.05).abs() < 1e-6);
    }

    #[tokio::test]
    async fn orthogonal_embedding_gets_its_own_cluster() {
        let store = Arc::new(MemoryClusterStore::default());
        let registry = ClusterRegistry::new(store.clone(), 0.7);

        let first = registry.assign(&unit(4, 0), None, "a").await.unwrap();
        let second = registry.assign(&unit(4, 1), None, "b").await.unwrap();
        assert!(second.created);
        assert_ne!(first.cluster_id, second.cluster_id);
    }

    #[tokio::test]
    async fn similarity_exactly_at_threshold_counts() {
        let store = Arc::new(MemoryClusterStore::default());
        // 45-degree neighbor has cosine similarity exactly 1/sqrt(2).
        let threshold = 1.0 / 2f64.sqrt();
        let registry = ClusterRegistry::new(store.clone(), threshold);

        registry.assign(&unit(2, 0), None, "a").await.unwrap();
        let diagonal = vec![1.0, 1.0];
        let assignment = registry.assign(&diagonal, None, "b").await.unwrap();
        assert!(!assignment.created, "threshold comparison must be >=");
    }

    #[tokio::test]
    async fn cas_conflicts_are_retried() {
        let store = Arc::new(MemoryClusterStore::default());
        store.fail_next_cas(2);
        let registry = ClusterRegistry::new(store.clone(), 0.7);

        registry.assign(&unit(4, 0), None, "a").await.unwrap();
        let assignment = registry.assign(&unit(4, 0), None, "b").await.unwrap();
        assert!(!assignment.created);

        let cluster = store.get(assignment.cluster_id).await.unwrap().unwrap();
        assert_eq!(cluster.member_count, 2);
    }

    #[test]
    fn incremental_update_matches_arithmetic_mean() {
        let centroid = vec![1.0, 3.0];
        let updated = incremental_centroid(&centroid, 2, &[4.0, 0.0]);
        assert_eq!(updated, vec![2.0, 2.0]);
    }

    #[test]
    fn short_name_falls_back_to_generated_id() {
        let name = short_name("   ");
        assert!(name.starts_with("cluster-"));
        assert!(short_name("Leaky Faucet Drip Repair Kit").eq("leaky faucet drip repair"));
    }

    #[test]
    fn cosine_handles_zero_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
