//! Batch persistence with per-row failure accounting.

use std::sync::Arc;

use tracing::{debug, warn};

use tabload_core::{NewProduct, RawRow};
use tabload_storage::{ImageRelocator, ProductStore};

use super::types::RowFailure;

/// A validated row waiting for its batch to be written.
#[derive(Debug, Clone)]
pub struct PendingRecord {
    /// 1-based data row number.
    pub row: usize,
    pub data: RawRow,
    pub product: NewProduct,
    /// Object key of an image copied for this row, removed again if the row
    /// is not stored.
    pub relocated_key: Option<String>,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub inserted: usize,
    pub failures: Vec<RowFailure>,
}

pub struct BatchPersister {
    store: Arc<dyn ProductStore>,
    images: Option<Arc<ImageRelocator>>,
}

impl BatchPersister {
    pub fn new(store: Arc<dyn ProductStore>, images: Option<Arc<ImageRelocator>>) -> Self {
        Self { store, images }
    }

    /// Write one batch with a single `create_many` call.
    ///
    /// Rows the store declines (duplicates, vanished categories) become
    /// failures while the rest of the batch is kept. If the call itself
    /// fails, every row of the batch is reported with the store error.
    pub async fn persist(&self, batch: Vec<PendingRecord>) -> BatchOutcome {
        if batch.is_empty() {
            return BatchOutcome::default();
        }

        let products: Vec<NewProduct> = batch.iter().map(|r| r.product.clone()).collect();
        match self.store.create_many(&products).await {
            Ok(outcome) => {
                let mut records: Vec<Option<PendingRecord>> = batch.into_iter().map(Some).collect();
                let mut failures = Vec::with_capacity(outcome.rejected.len());
                for rejected in outcome.rejected {
                    let Some(record) = records.get_mut(rejected.index).and_then(Option::take) else {
                        continue;
                    };
                    self.discard_image(&record).await;
                    failures.push(RowFailure {
                        row: record.row,
                        data: record.data,
                        reason: rejected.reason,
                    });
                }
                debug!(
                    inserted = outcome.inserted,
                    rejected = failures.len(),
                    "batch persisted"
                );
                BatchOutcome {
                    inserted: outcome.inserted,
                    failures,
                }
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(rows = batch.len(), error = %reason, "batch insert failed");
                let mut failures = Vec::with_capacity(batch.len());
                for record in batch {
                    self.discard_image(&record).await;
                    failures.push(RowFailure {
                        row: record.row,
                        data: record.data,
                        reason: reason.clone(),
                    });
                }
                BatchOutcome {
                    inserted: 0,
                    failures,
                }
            }
        }
    }

    async fn discard_image(&self, record: &PendingRecord) {
        if let (Some(images), Some(key)) = (&self.images, &record.relocated_key) {
            images.discard(key).await;
        }
    }
}
