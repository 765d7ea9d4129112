//! Server startup: product store selection and shared state initialization.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use tabload_core::Config;
use tabload_storage::{FetchPolicy, ImageRelocator, MemoryStore, ObjectStorage, PgStore, ProductStore};

use crate::bulk::{JobRegistry, JobRunner};
use crate::db;
use crate::state::AppState;

/// PostgreSQL when configured and reachable, otherwise the in-memory store.
pub async fn build_store(config: &Config) -> Arc<dyn ProductStore> {
    match db::init_pg_pool(&config.postgres).await {
        Some(pool) => Arc::new(PgStore::new(pool)),
        None => {
            warn!("Using in-memory product store; imported products are lost on restart");
            Arc::new(MemoryStore::new())
        }
    }
}

/// Wire the job registry, runner and optional image relocation around `store`.
pub fn build_runner(config: &Config, store: Arc<dyn ProductStore>) -> anyhow::Result<JobRunner> {
    let registry = Arc::new(JobRegistry::new());
    let runner = JobRunner::new(registry, store, config.bulk.clone());

    if !config.bulk.relocate_images {
        return Ok(runner);
    }

    let storage = Arc::new(ObjectStorage::from_config(&config.storage)?);
    let policy = FetchPolicy {
        timeout: Duration::from_secs(config.bulk.image_fetch_timeout_secs),
        max_bytes: config.bulk.image_max_bytes,
        allowed_hosts: config.bulk.image_allowed_hosts.clone(),
    };
    let images = ImageRelocator::new(storage, config.bulk.image_folder.clone(), policy)?;
    info!(
        folder = %config.bulk.image_folder,
        max_bytes = config.bulk.image_max_bytes,
        "Image relocation enabled"
    );
    Ok(runner.with_image_relocator(Arc::new(images)))
}

pub async fn build_app_state(config: Config) -> anyhow::Result<Arc<AppState>> {
    let store = build_store(&config).await;
    info!(backend = store.backend_name(), "Product store ready");
    let runner = build_runner(&config, store.clone())?;
    Ok(Arc::new(AppState::new(config, store, runner)))
}
