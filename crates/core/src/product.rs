use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::TabloadError;

/// One decoded line of an upload: column name -> untyped cell value.
///
/// Column order follows the file header.
pub type RawRow = IndexMap<String, serde_json::Value>;

/// Primary key of a category row.
pub type CategoryId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
}

/// A validated product ready to be inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    pub name: String,
    pub price: f64,
    pub category_id: CategoryId,
    pub image_url: Option<String>,
    pub image_key: Option<String>,
    /// Store-wide unique key; the store assigns one when absent.
    pub unique_id: Option<String>,
}

/// Category resolution used while normalizing rows.
#[async_trait]
pub trait CategoryLookup: Send + Sync {
    async fn find_category_by_id(&self, id: CategoryId) -> Result<Option<Category>, TabloadError>;

    /// Exact, case-insensitive match on the display name.
    async fn find_category_by_name(&self, name: &str) -> Result<Option<Category>, TabloadError>;
}

/// Render a raw cell as trimmed text, treating null and blank as absent.
pub fn cell_text(value: &serde_json::Value) -> Option<String> {
    let text = match value {
        serde_json::Value::Null => return None,
        serde_json::Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
