//! Batch cluster maintenance: full recompute, merge of near-duplicate
//! clusters, and outlier reassignment.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::registry::cosine_similarity;
use crate::traits::{ClusterStore, PostStore};

/// Recompute every centroid as the arithmetic mean of its members'
/// embeddings, accumulating in f64. Clusters with no remaining members are
/// left untouched.
pub async fn recompute_all(clusters: &Arc<dyn ClusterStore>) -> Result<usize> {
    let mut recomputed = 0;

    for cluster in clusters.all().await? {
        let members = clusters.member_embeddings(cluster.id).await?;
        if members.is_empty() {
            continue;
        }

        let mean = mean_embedding(&members);
        clusters
            .set_centroid(cluster.id, &mean, members.len() as i64)
            .await?;
        recomputed += 1;
    }

    info!(recomputed, "Centroid recompute complete");
    Ok(recomputed)
}

/// Merge clusters whose centroids exceed `threshold` cosine similarity. The
/// smaller cluster's posts move into the larger, the survivor's centroid is
/// recomputed as the member-weighted mean, and the loser is deleted.
pub async fn merge_similar(clusters: &Arc<dyn ClusterStore>, threshold: f64) -> Result<usize> {
    let all = clusters.all().await?;
    let mut absorbed: HashSet<i64> = HashSet::new();
    let mut merges = 0;

    for i in 0..all.len() {
        if absorbed.contains(&all[i].id) {
            continue;
        }
        for j in (i + 1)..all.len() {
            if absorbed.contains(&all[j].id) {
                continue;
            }

            let similarity = cosine_similarity(&all[i].centroid, &all[j].centroid);
            if similarity < threshold {
                continue;
            }

            let (survivor, loser) = if all[i].member_count >= all[j].member_count {
                (&all[i], &all[j])
            } else {
                (&all[j], &all[i])
            };

            let moved = clusters.reassign_posts(loser.id, survivor.id).await?;
            let merged = weighted_mean(
                &survivor.centroid,
                survivor.member_count,
                &loser.centroid,
                loser.member_count,
            );
            clusters
                .set_centroid(
                    survivor.id,
                    &merged,
                    survivor.member_count + loser.member_count,
                )
                .await?;
            clusters.delete(loser.id).await?;

            info!(
                survivor = survivor.id,
                loser = loser.id,
                moved,
                similarity,
                "Merged similar clusters"
            );
            absorbed.insert(loser.id);
            merges += 1;

            if absorbed.contains(&all[i].id) {
                break;
            }
        }
    }

    Ok(merges)
}

/// Sweep processed posts: any post whose embedding is nearer to a different
/// cluster than its assigned one is moved, and both clusters' centroids are
/// recomputed from their members.
pub async fn reassign_outliers(
    posts: &Arc<dyn PostStore>,
    clusters: &Arc<dyn ClusterStore>,
    threshold: f64,
    batch_size: i64,
) -> Result<usize> {
    let mut moved = 0;
    let mut touched: HashSet<i64> = HashSet::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = posts
            .processed_with_embeddings(cursor.as_deref(), batch_size)
            .await?;
        if page.is_empty() {
            break;
        }
        cursor = page.last().map(|(id, _, _)| id.clone());

        for (post_id, embedding, assigned) in page {
            let Some(nearest) = clusters.find_nearest(&embedding, threshold).await? else {
                continue;
            };
            if nearest.id == assigned {
                continue;
            }

            posts.reassign_cluster(&post_id, nearest.id).await?;
            touched.insert(assigned);
            touched.insert(nearest.id);
            moved += 1;
        }
    }

    for cluster_id in touched {
        let members = clusters.member_embeddings(cluster_id).await?;
        if members.is_empty() {
            continue;
        }
        let mean = mean_embedding(&members);
        clusters
            .set_centroid(cluster_id, &mean, members.len() as i64)
            .await?;
    }

    info!(moved, "Outlier reassignment complete");
    Ok(moved)
}

/// Arithmetic mean with explicit f64 sums.
fn mean_embedding(members: &[Vec<f32>]) -> Vec<f32> {
    let dim = members[0].len();
    let mut sums = vec![0f64; dim];
    for member in members {
        for (slot, value) in sums.iter_mut().zip(member.iter()) {
            *slot += *value as f64;
        }
    }
    let n = members.len() as f64;
    sums.into_iter().map(|s| (s / n) as f32).collect()
}

fn weighted_mean(a: &[f32], weight_a: i64, b: &[f32], weight_b: i64) -> Vec<f32> {
    let wa = weight_a as f64;
    let wb = weight_b as f64;
    let total = (wa + wb).max(1.0);
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| ((*x as f64 * wa + *y as f64 * wb) / total) as f32)
        .collect()
}
