//! HTTP endpoint modules.
//!
//! Shared error response type and helpers live here in mod.rs.

pub mod bulk;
pub mod doc;
pub mod health;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

// ── Shared types ─────────────────────────────────────────────────

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

pub(crate) type ApiResult<T> = Result<T, (StatusCode, Json<ErrorResponse>)>;

pub(crate) fn bad_request(msg: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse { error: msg.into() }),
    )
}

// ── Re-exports ───────────────────────────────────────────────────
// Keeps flat `api::foo` paths for route registration.

pub use bulk::{bulk_cancel, bulk_jobs, bulk_status, bulk_upload};
pub use health::health;
