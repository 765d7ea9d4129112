//! In-process product store.
//!
//! Used when PostgreSQL is not configured, and as the store behind most tests.
//! Enforces the same constraints as the SQL schema: unique product keys and
//! existing category references.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use uuid::Uuid;

use tabload_core::{Category, CategoryId, CategoryLookup, NewProduct, TabloadError};

use crate::error::StoreError;
use crate::store::{CreateManyOutcome, ProductStore, RejectedRecord, DUPLICATE_REASON};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredProduct {
    pub id: i64,
    pub unique_id: String,
    pub name: String,
    pub price: f64,
    pub category_id: CategoryId,
    pub image_url: Option<String>,
    pub image_key: Option<String>,
}

#[derive(Debug, Default)]
struct Tables {
    categories: Vec<Category>,
    products: Vec<StoredProduct>,
    unique_ids: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with categories named in order (ids from 1).
    pub fn with_categories<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        for name in names {
            store.add_category(name);
        }
        store
    }

    pub fn add_category(&self, name: impl Into<String>) -> Category {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let category = Category {
            id: tables.categories.len() as CategoryId + 1,
            name: name.into(),
        };
        tables.categories.push(category.clone());
        category
    }

    pub fn products(&self) -> Vec<StoredProduct> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .products
            .clone()
    }

    pub fn product_count(&self) -> usize {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .products
            .len()
    }
}

#[async_trait]
impl CategoryLookup for MemoryStore {
    async fn find_category_by_id(&self, id: CategoryId) -> Result<Option<Category>, TabloadError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables.categories.iter().find(|c| c.id == id).cloned())
    }

    async fn find_category_by_name(&self, name: &str) -> Result<Option<Category>, TabloadError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables
            .categories
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name.trim()))
            .cloned())
    }
}

#[async_trait]
impl ProductStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn create_many(&self, products: &[NewProduct]) -> Result<CreateManyOutcome, StoreError> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let mut outcome = CreateManyOutcome::default();

        for (index, product) in products.iter().enumerate() {
            if !tables.categories.iter().any(|c| c.id == product.category_id) {
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
            if !tables.unique_ids.insert(unique_id.clone()) {
                outcome.rejected.push(RejectedRecord {
                    index,
                    reason: DUPLICATE_REASON.to_string(),
                });
                continue;
            }

            let id = tables.products.len() as i64 + 1;
            tables.products.push(StoredProduct {
                id,
                unique_id,
                name: product.name.clone(),
                price: product.price,
                category_id: product.category_id,
                image_url: product.image_url.clone(),
                image_key: product.image_key.clone(),
            });
            outcome.inserted += 1;
        }

        Ok(outcome)
    }
}
