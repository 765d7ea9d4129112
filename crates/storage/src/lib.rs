pub mod backend;
pub mod error;
pub mod images;
pub mod memory;
pub mod postgres;
pub mod store;

pub use backend::{ObjectStorage, StoredObject};
pub use error::{StorageError, StoreError};
pub use images::{is_remote_url, FetchPolicy, ImageRelocator};
pub use memory::{MemoryStore, StoredProduct};
pub use postgres::PgStore;
pub use store::{CreateManyOutcome, ProductStore, RejectedRecord, DUPLICATE_REASON};
