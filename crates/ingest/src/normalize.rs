//! Row validation: required fields, price coercion, category resolution.
//!
//! Bulk files refer to categories either by primary key or by display name,
//! so [`Normalizer`] accepts both. Resolved keys are cached per import.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use serde_json::Value;
use thiserror::Error;

use tabload_core::{cell_text, CategoryId, CategoryLookup, NewProduct, RawRow};

const NAME_COLUMNS: &[&str] = &["name", "productname"];
const PRICE_COLUMNS: &[&str] = &["price"];
const CATEGORY_COLUMNS: &[&str] = &["categoryid", "category"];
const IMAGE_URL_COLUMNS: &[&str] = &["imageurl", "image"];
const IMAGE_KEY_COLUMNS: &[&str] = &["imagekey"];
const UNIQUE_ID_COLUMNS: &[&str] = &["uniqueid", "sku"];

/// Why a row was not turned into a product.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowRejection {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid price")]
    InvalidPrice,
    #[error("invalid category")]
    InvalidCategory,
    #[error("category lookup failed: {0}")]
    Lookup(String),
}

/// Turns raw rows into insertable products.
pub struct Normalizer<L: CategoryLookup + ?Sized> {
    lookup: Arc<L>,
    categories: LruCache<String, Option<CategoryId>>,
}

impl<L: CategoryLookup + ?Sized> Normalizer<L> {
    pub fn new(lookup: Arc<L>, cache_size: usize) -> Self {
        Self {
            lookup,
            categories: LruCache::new(NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    /// Validate one row. Missing fields are checked in the order
    /// name, price, category; the first one missing is reported.
    pub async fn normalize(&mut self, row: &RawRow) -> Result<NewProduct, RowRejection> {
        let name = text_field(row, NAME_COLUMNS).ok_or(RowRejection::MissingField("name"))?;
        let price_cell = field(row, PRICE_COLUMNS)
            .filter(|v| cell_text(v).is_some())
            .ok_or(RowRejection::MissingField("price"))?;
        let category_key =
            text_field(row, CATEGORY_COLUMNS).ok_or(RowRejection::MissingField("categoryId"))?;

        let price = parse_price(price_cell).ok_or(RowRejection::InvalidPrice)?;
        let category_id = self
            .resolve_category(&category_key)
            .await?
            .ok_or(RowRejection::InvalidCategory)?;

        Ok(NewProduct {
            name,
            price,
            category_id,
            image_url: text_field(row, IMAGE_URL_COLUMNS),
            image_key: text_field(row, IMAGE_KEY_COLUMNS),
            unique_id: text_field(row, UNIQUE_ID_COLUMNS),
        })
    }

    async fn resolve_category(&mut self, key: &str) -> Result<Option<CategoryId>, RowRejection> {
        if let Some(cached) = self.categories.get(key) {
            return Ok(*cached);
        }

        let found = match parse_category_id(key) {
            Some(id) => self.lookup.find_category_by_id(id).await,
            None => self.lookup.find_category_by_name(key).await,
        }
        .map_err(|e| RowRejection::Lookup(e.to_string()))?;

        let resolved = found.map(|category| category.id);
        self.categories.put(key.to_string(), resolved);
        Ok(resolved)
    }
}

/// Lowercase and drop separators so `categoryId`, `category_id` and
/// `Category ID` compare equal.
fn column_key(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn field<'r>(row: &'r RawRow, columns: &[&str]) -> Option<&'r Value> {
    row.iter()
        .find(|(key, _)| columns.contains(&column_key(key).as_str()))
        .map(|(_, value)| value)
}

fn text_field(row: &RawRow, columns: &[&str]) -> Option<String> {
    field(row, columns).and_then(cell_text)
}

fn parse_price(value: &Value) -> Option<f64> {
    let price = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (price.is_finite() && price >= 0.0).then_some(price)
}

/// A category key is numeric when it parses as an integer, including
/// whole-valued floats produced by spreadsheet cells (`3.0`).
fn parse_category_id(key: &str) -> Option<CategoryId> {
    key.parse::<CategoryId>().ok().or_else(|| {
        key.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite() && f.fract() == 0.0)
            .map(|f| f as CategoryId)
    })
}
