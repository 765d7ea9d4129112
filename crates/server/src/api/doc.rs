//! OpenAPI documentation aggregator.
//!
//! Collects all `#[utoipa::path]`-annotated handlers and `ToSchema`-derived
//! types into a single OpenAPI 3.1 document, served via Scalar UI at `/docs`.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "tabload API",
        version = "0.1.0",
        description = "Background bulk product imports from CSV and spreadsheet uploads.",
    ),
    tags(
        (name = "Health", description = "Server liveness"),
        (name = "Bulk Import", description = "Upload product files, poll job progress, cancel and list jobs"),
    ),
    paths(
        // Health
        crate::api::health::health,
        // Bulk Import
        crate::api::bulk::bulk_upload,
        crate::api::bulk::bulk_status,
        crate::api::bulk::bulk_cancel,
        crate::api::bulk::bulk_jobs,
    ),
    components(schemas(
        crate::api::ErrorResponse,
        crate::api::health::HealthResponse,
        crate::api::bulk::UploadAccepted,
        crate::bulk::types::JobSummary,
        crate::bulk::types::JobPage,
        crate::bulk::types::JobStatus,
    ))
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_bulk_routes() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        assert!(paths.iter().any(|p| p.as_str() == "/api/products/bulk-upload"));
        assert!(paths.iter().any(|p| p.as_str() == "/api/products/bulk-status/{job_id}"));
        assert!(paths.iter().any(|p| p.as_str() == "/health"));
    }
}
