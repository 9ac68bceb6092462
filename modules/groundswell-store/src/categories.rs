use anyhow::Result;
use sqlx::PgPool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub parent_id: Option<i64>,
}

#[derive(Clone)]
pub struct CategoryRepo {
    pool: PgPool,
}

impl CategoryRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find-or-create by unique name. The conflict-update no-op makes the
    /// RETURNING clause yield the existing row, so concurrent callers all
    /// resolve to the same id.
    pub async fn find_or_create(
        &self,
        name: &str,
        description: &str,
        parent_id: Option<i64>,
    ) -> Result<Category> {
        let category = sqlx::query_as::<_, Category>(
            "INSERT INTO categories (name, description, parent_id)
             VALUES ($1, $2, $3)
             ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
             RETURNING id, name, description, parent_id",
        )
        .bind(name)
        .bind(description)
        .bind(parent_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(category)
    }

    pub async fn get(&self, id: i64) -> Result<Option<Category>> {
        let category = sqlx::query_as::<_, Category>(
            "SELECT id, name, description, parent_id FROM categories WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(category)
    }

    /// Existing category names, offered to the category-assignment prompt as
    /// candidates alongside the fixed list.
    pub async fn all_names(&self) -> Result<Vec<String>> {
        let rows =
            sqlx::query_as::<_, (String,)>("SELECT name FROM categories ORDER BY name")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}
