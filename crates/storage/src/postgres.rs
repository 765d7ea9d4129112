//! PostgreSQL product store.
//!
//! Schema lives in `migrations/`; the server applies it at startup.

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use tabload_core::{Category, CategoryId, CategoryLookup, NewProduct, TabloadError};

use crate::error::StoreError;
use crate::store::{CreateManyOutcome, ProductStore, RejectedRecord, DUPLICATE_REASON};

const INSERT_BATCH_SQL: &str = r#"
    INSERT INTO products (name, price, category_id, image_url, image_key, unique_id)
    SELECT * FROM UNNEST($1::text[], $2::float8[], $3::int8[], $4::text[], $5::text[], $6::text[])
    ON CONFLICT (unique_id) DO NOTHING
    RETURNING unique_id
"#;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn lookup_error(e: sqlx::Error) -> TabloadError {
    TabloadError::Store(e.to_string())
}

#[async_trait]
impl CategoryLookup for PgStore {
    async fn find_category_by_id(&self, id: CategoryId) -> Result<Option<Category>, TabloadError> {
        let row = sqlx::query_as::<_, (i64, String)>("SELECT id, name FROM categories WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(lookup_error)?;
        Ok(row.map(|(id, name)| Category { id, name }))
    }

    async fn find_category_by_name(&self, name: &str) -> Result<Option<Category>, TabloadError> {
        let row = sqlx::query_as::<_, (i64, String)>(
            "SELECT id, name FROM categories WHERE lower(name) = lower($1) ORDER BY id LIMIT 1",
        )
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await
        .map_err(lookup_error)?;
        Ok(row.map(|(id, name)| Category { id, name }))
    }
}

#[async_trait]
impl ProductStore for PgStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    /// One transaction per batch: rows whose category vanished since
    /// validation are rejected up front, the rest go in as a single
    /// `INSERT ... ON CONFLICT DO NOTHING`.
    async fn create_many(&self, products: &[NewProduct]) -> Result<CreateManyOutcome, StoreError> {
        if products.is_empty() {
            return Ok(CreateManyOutcome::default());
        }

        let mut tx = self.pool.begin().await?;

        let mut wanted: Vec<i64> = products.iter().map(|p| p.category_id).collect();
        wanted.sort_unstable();
        wanted.dedup();
        let existing: HashSet<i64> =
            sqlx::query_scalar::<_, i64>("SELECT id FROM categories WHERE id = ANY($1)")
                .bind(&wanted)
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .collect();

        let mut outcome = CreateManyOutcome::default();
        let mut pending: Vec<(usize, String)> = Vec::with_capacity(products.len());
        let mut names = Vec::with_capacity(products.len());
        let mut prices = Vec::with_capacity(products.len());
        let mut category_ids = Vec::with_capacity(products.len());
        let mut image_urls = Vec::with_capacity(products.len());
        let mut image_keys = Vec::with_capacity(products.len());
        let mut unique_ids = Vec::with_capacity(products.len());

        for (index, product) in products.iter().enumerate() {
            if !existing.contains(&product.category_id) {
                outcome.rejected.push(RejectedRecord {
                    index,
                    reason: format!("category {} does not exist", product.category_id),
                });
                continue;
            }
            let unique_id = product
                .unique_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            pending.push((index, unique_id.clone()));
            names.push(product.name.clone());
            prices.push(product.price);
            category_ids.push(product.category_id);
            image_urls.push(product.image_url.clone());
            image_keys.push(product.image_key.clone());
            unique_ids.push(unique_id);
        }

        let mut inserted: HashSet<String> = if pending.is_empty() {
            HashSet::new()
        } else {
            sqlx::query_scalar::<_, String>(INSERT_BATCH_SQL)
                .bind(&names)
                .bind(&prices)
                .bind(&category_ids)
                .bind(&image_urls)
                .bind(&image_keys)
                .bind(&unique_ids)
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .collect()
        };

        tx.commit().await?;

        // A key repeated inside the batch comes back once; the first
        // occurrence claims it and later ones count as duplicates.
        for (index, unique_id) in pending {
            if inserted.remove(&unique_id) {
                outcome.inserted += 1;
            } else {
                outcome.rejected.push(RejectedRecord {
                    index,
                    reason: DUPLICATE_REASON.to_string(),
                });
            }
        }
        outcome.rejected.sort_by_key(|r| r.index);

        debug!(
            inserted = outcome.inserted,
            rejected = outcome.rejected.len(),
            "postgres batch insert finished"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Requires a migrated database at `DATABASE_URL`.
    /// Run with `cargo test -p tabload-storage -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn batch_insert_skips_duplicates() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL not set");
        let pool = PgPool::connect(&url).await.unwrap();
        let store = PgStore::new(pool.clone());

        let category_id: i64 = sqlx::query_scalar(
            "INSERT INTO categories (name) VALUES ($1) RETURNING id",
        )
        .bind(format!("test-{}", Uuid::new_v4()))
        .fetch_one(&pool)
        .await
        .unwrap();

        let key = Uuid::new_v4().to_string();
        let product = |name: &str| NewProduct {
            name: name.to_string(),
            price: 2.0,
            category_id,
            image_url: None,
            image_key: None,
            unique_id: Some(key.clone()),
        };

        let outcome = store
            .create_many(&[product("first"), product("second")])
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].index, 1);
        assert_eq!(outcome.rejected[0].reason, DUPLICATE_REASON);
    }
}
