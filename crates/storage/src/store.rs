use async_trait::async_trait;

use tabload_core::{CategoryLookup, NewProduct};

use crate::error::StoreError;

/// Reason recorded for rows whose unique key already exists.
pub const DUPLICATE_REASON: &str = "duplicate product skipped";

/// A row the store declined while the rest of its batch went through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    /// Position of the record in the submitted slice.
    pub index: usize,
    pub reason: String,
}

/// Result of one `create_many` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateManyOutcome {
    pub inserted: usize,
    pub rejected: Vec<RejectedRecord>,
}

/// Persistent product store.
///
/// `create_many` inserts a whole batch in one call. Duplicate unique keys and
/// other per-row problems come back in `rejected`; an `Err` means the call
/// itself failed and nothing from the batch can be assumed stored.
#[async_trait]
pub trait ProductStore: CategoryLookup {
    /// Short backend label for logs and health output.
    fn backend_name(&self) -> &'static str;

    async fn create_many(&self, products: &[NewProduct]) -> Result<CreateManyOutcome, StoreError>;
}
