//! Liveness endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Product store backend (`postgres` or `memory`).
    pub store: &'static str,
    /// Bulk jobs known since startup.
    pub jobs: usize,
}

/// Server liveness
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Server is up", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        store: state.store.backend_name(),
        jobs: state.registry.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabload_core::config::BulkConfig;
    use tabload_core::Config;
    use tabload_storage::{MemoryStore, ProductStore};

    use crate::bulk::{JobRegistry, JobRunner};

    #[tokio::test]
    async fn reports_store_backend() {
        let store: Arc<dyn ProductStore> = Arc::new(MemoryStore::new());
        let runner = JobRunner::new(Arc::new(JobRegistry::new()), store.clone(), BulkConfig::default());
        let state = Arc::new(AppState::new(Config::for_profile("HEALTHTEST"), store, runner));

        let Json(body) = health(State(state)).await;
        assert_eq!(body.status, "ok");
        assert_eq!(body.store, "memory");
        assert_eq!(body.jobs, 0);
    }
}
