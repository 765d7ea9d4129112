//! Bulk product upload, job status polling, cancellation and listing.

use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bulk::{CancelOutcome, JobPage, JobSummary, Upload};
use crate::state::AppState;

use super::{bad_request, ApiResult, ErrorResponse};

/// Multipart field that carries the spreadsheet.
const FILE_FIELD: &str = "file";

// ── Request/Response types ────────────────────────

#[derive(Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadAccepted {
    pub message: String,
    #[schema(value_type = String)]
    pub job_id: Uuid,
    /// Path to poll for progress.
    pub check_status: String,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    /// Skip this many failed rows (default 0).
    pub failures_offset: Option<usize>,
    /// Return at most this many failed rows (default all).
    pub failures_limit: Option<usize>,
}

fn status_path(id: Uuid) -> String {
    format!("/api/products/bulk-status/{id}")
}

fn not_found() -> Response {
    (StatusCode::OK, Json(json!({ "status": "not-found" }))).into_response()
}

// ── POST /api/products/bulk-upload ────────────────

/// Start a bulk product import
///
/// Accepts multipart/form-data with a `file` field (CSV, XLSX, XLS or ODS).
/// Returns immediately with a job id; rows are processed in the background.
#[utoipa::path(
    post,
    path = "/api/products/bulk-upload",
    tag = "Bulk Import",
    request_body(content_type = "multipart/form-data", description = "Spreadsheet in the `file` field"),
    responses(
        (status = 202, description = "Import started", body = UploadAccepted),
        (status = 400, description = "Missing or unreadable file", body = ErrorResponse)
    )
)]
pub async fn bulk_upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadAccepted>)> {
    let upload = read_file_field(&mut multipart).await?;
    let file_name = upload.file_name.clone();

    let job_id = state.runner.submit(upload).map_err(|e| {
        warn!(file = %file_name, error = %e, "bulk upload rejected");
        bad_request(e.to_string())
    })?;

    info!(job_id = %job_id, file = %file_name, "bulk upload accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(UploadAccepted {
            message: "Bulk upload started".to_string(),
            job_id,
            check_status: status_path(job_id),
        }),
    ))
}

async fn read_file_field(multipart: &mut Multipart) -> ApiResult<Upload> {
    loop {
        let field = multipart.next_field().await.map_err(|e| {
            (e.status(), Json(ErrorResponse { error: format!("Multipart error: {}", e.body_text()) }))
        })?;
        let Some(field) = field else {
            return Err(bad_request(format!("No file provided in the `{FILE_FIELD}` field")));
        };
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or("upload.csv").to_string();
        let bytes = field.bytes().await.map_err(|e| {
            (e.status(), Json(ErrorResponse { error: format!("Failed to read file: {}", e.body_text()) }))
        })?;
        return Ok(Upload { file_name, bytes });
    }
}

// ── GET /api/products/bulk-status/{job_id} ────────

/// Poll a bulk import
///
/// Unknown or malformed ids return `{"status": "not-found"}` with 200.
#[utoipa::path(
    get,
    path = "/api/products/bulk-status/{job_id}",
    tag = "Bulk Import",
    params(
        ("job_id" = String, Path, description = "Job id returned by the upload"),
        StatusQuery
    ),
    responses(
        (status = 200, description = "Job snapshot, or {status: \"not-found\"}", body = JobPage)
    )
)]
pub async fn bulk_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Response {
    let Ok(id) = Uuid::parse_str(&job_id) else {
        return not_found();
    };
    let offset = query.failures_offset.unwrap_or(0);
    let limit = query.failures_limit.unwrap_or(usize::MAX);
    match state.registry.snapshot(&id, offset, limit) {
        Some(page) => Json(page).into_response(),
        None => not_found(),
    }
}

// ── DELETE /api/products/bulk-status/{job_id} ─────

/// Cancel a running bulk import
///
/// The job stops before its next batch and ends as `failed` with error
/// `cancelled`, including when the request arrives during the final batch.
/// Rows already stored are kept.
#[utoipa::path(
    delete,
    path = "/api/products/bulk-status/{job_id}",
    tag = "Bulk Import",
    params(
        ("job_id" = String, Path, description = "Job id returned by the upload")
    ),
    responses(
        (status = 202, description = "Cancellation requested"),
        (status = 200, description = "Unknown job: {status: \"not-found\"}"),
        (status = 409, description = "Job already finished", body = ErrorResponse)
    )
)]
pub async fn bulk_cancel(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Response {
    let Ok(id) = Uuid::parse_str(&job_id) else {
        return not_found();
    };

    match state.registry.cancel(&id) {
        CancelOutcome::Requested => {
            info!(job_id = %id, "bulk import cancellation requested");
            (
                StatusCode::ACCEPTED,
                Json(json!({ "status": "cancelling", "jobId": id })),
            )
                .into_response()
        }
        CancelOutcome::NotFound => not_found(),
        CancelOutcome::AlreadyFinished(status) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: format!("job already {}", status.as_str()),
            }),
        )
            .into_response(),
    }
}

// ── GET /api/products/bulk-jobs ───────────────────

/// List bulk imports, oldest first (failed rows omitted)
#[utoipa::path(
    get,
    path = "/api/products/bulk-jobs",
    tag = "Bulk Import",
    responses(
        (status = 200, description = "Job summaries", body = Vec<JobSummary>)
    )
)]
pub async fn bulk_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobSummary>> {
    Json(state.registry.summaries())
}
