use anyhow::Result;
use pgvector::Vector;
use sqlx::PgPool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClusterRow {
    pub id: i64,
    pub name: String,
    pub centroid: Vector,
    pub member_count: i64,
    pub category_id: Option<i64>,
}

/// Nearest-centroid hit from a similarity search.
#[derive(Debug, Clone)]
pub struct NearestCluster {
    pub cluster: ClusterRow,
    pub similarity: f64,
}

#[derive(Clone)]
pub struct ClusterRepo {
    pool: PgPool,
}

impl ClusterRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Single nearest centroid with cosine similarity at or above the
    /// threshold (>=, so an exact-threshold match counts).
    pub async fn find_nearest(
        &self,
        embedding: &[f32],
        threshold: f64,
    ) -> Result<Option<NearestCluster>> {
        let query_vec = Vector::from(embedding.to_vec());
        let row = sqlx::query_as::<_, (i64, String, Vector, i64, Option<i64>, f64)>(
            "SELECT id, name, centroid, member_count, category_id,
                    (1 - (centroid <=> $1))::float8 AS similarity
             FROM clusters
             ORDER BY centroid <=> $1
             LIMIT 1",
        )
        .bind(&query_vec)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|(id, name, centroid, member_count, category_id, similarity)| {
            if similarity >= threshold {
                Some(NearestCluster {
                    cluster: ClusterRow {
                        id,
                        name,
                        centroid,
                        member_count,
                        category_id,
                    },
                    similarity,
                })
            } else {
                None
            }
        }))
    }

    pub async fn create(
        &self,
        name: &str,
        centroid: &[f32],
        category_id: Option<i64>,
    ) -> Result<ClusterRow> {
        let vec = Vector::from(centroid.to_vec());
        let cluster = sqlx::query_as::<_, ClusterRow>(
            "INSERT INTO clusters (name, centroid, member_count, category_id)
             VALUES ($1, $2, 1, $3)
             RETURNING id, name, centroid, member_count, category_id",
        )
        .bind(name)
        .bind(&vec)
        .bind(category_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(cluster)
    }

    pub async fn get(&self, id: i64) -> Result<Option<ClusterRow>> {
        let cluster = sqlx::query_as::<_, ClusterRow>(
            "SELECT id, name, centroid, member_count, category_id FROM clusters WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(cluster)
    }

    pub async fn all(&self) -> Result<Vec<ClusterRow>> {
        let clusters = sqlx::query_as::<_, ClusterRow>(
            "SELECT id, name, centroid, member_count, category_id FROM clusters ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(clusters)
    }

    /// Compare-and-set centroid update: succeeds only if `member_count` still
    /// equals the value the caller computed against, serializing concurrent
    /// writers to the same cluster.
    pub async fn try_update_centroid(
        &self,
        id: i64,
        new_centroid: &[f32],
        expected_member_count: i64,
    ) -> Result<bool> {
        let vec = Vector::from(new_centroid.to_vec());
        let result = sqlx::query(
            "UPDATE clusters
             SET centroid = $2, member_count = member_count + 1, updated_at = now()
             WHERE id = $1 AND member_count = $3",
        )
        .bind(id)
        .bind(&vec)
        .bind(expected_member_count)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Overwrite centroid and member count (batch recompute).
    pub async fn set_centroid(&self, id: i64, centroid: &[f32], member_count: i64) -> Result<()> {
        let vec = Vector::from(centroid.to_vec());
        sqlx::query(
            "UPDATE clusters SET centroid = $2, member_count = $3, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(&vec)
        .bind(member_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All member embeddings for a cluster (recompute / merge).
    pub async fn member_embeddings(&self, id: i64) -> Result<Vec<Vec<f32>>> {
        let rows = sqlx::query_as::<_, (Vector,)>(
            "SELECT embedding FROM posts WHERE cluster_id = $1 AND embedding IS NOT NULL",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.0.to_vec()).collect())
    }

    /// Move every post from one cluster to another; returns rows moved.
    pub async fn reassign_posts(&self, from: i64, to: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE posts SET cluster_id = $2, updated_at = now() WHERE cluster_id = $1",
        )
        .bind(from)
        .bind(to)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM clusters WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
