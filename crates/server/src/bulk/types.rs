//! Job records for bulk product imports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tabload_core::RawRow;

// ── Status ──────────────────────────────────────────────────────────

/// Lifecycle state of a bulk import job.
///
/// `Pending -> Processing -> {Completed | Failed}`. Unknown ids are reported
/// through [`JobView::NotFound`] rather than a status variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

// ── Row failures ────────────────────────────────────────────────────

/// A data row that did not make it into the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowFailure {
    /// 1-based position among the decoded data rows (header excluded).
    pub row: usize,
    pub data: RawRow,
    pub reason: String,
}

// ── Job ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub file_name: String,
    pub status: JobStatus,
    /// 0..=100, never decreases.
    pub progress: u8,
    pub inserted_count: usize,
    pub failed_rows: Vec<RowFailure>,
    pub total_rows: usize,
    pub processed_rows: usize,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: Uuid, file_name: impl Into<String>) -> Self {
        Self {
            id,
            file_name: file_name.into(),
            status: JobStatus::Pending,
            progress: 0,
            inserted_count: 0,
            failed_rows: Vec::new(),
            total_rows: 0,
            processed_rows: 0,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn failed_count(&self) -> usize {
        self.failed_rows.len()
    }

    /// Everything except the failed rows themselves.
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            file_name: self.file_name.clone(),
            status: self.status,
            progress: self.progress,
            inserted_count: self.inserted_count,
            failed_count: self.failed_count(),
            total_rows: self.total_rows,
            processed_rows: self.processed_rows,
            error: self.error.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }

    /// Summary plus at most `limit` failed rows starting at `offset`.
    pub fn page(&self, offset: usize, limit: usize) -> JobPage {
        let start = offset.min(self.failed_rows.len());
        let end = start.saturating_add(limit).min(self.failed_rows.len());
        JobPage {
            summary: self.summary(),
            failures_offset: offset,
            failed_rows: self.failed_rows[start..end].to_vec(),
        }
    }
}

// ── Read models ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    #[schema(value_type = String)]
    pub id: Uuid,
    pub file_name: String,
    pub status: JobStatus,
    pub progress: u8,
    pub inserted_count: usize,
    pub failed_count: usize,
    pub total_rows: usize,
    pub processed_rows: usize,
    pub error: Option<String>,
    #[schema(value_type = String)]
    pub created_at: DateTime<Utc>,
    #[schema(value_type = Option<String>)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// One page of a job's failed rows, served by the status endpoint.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobPage {
    #[serde(flatten)]
    pub summary: JobSummary,
    pub failures_offset: usize,
    #[schema(value_type = Vec<Object>)]
    pub failed_rows: Vec<RowFailure>,
}

/// Result of a registry read.
#[derive(Debug, Clone)]
pub enum JobView {
    Found(Job),
    NotFound,
}

impl JobView {
    pub fn found(self) -> Option<Job> {
        match self {
            JobView::Found(job) => Some(job),
            JobView::NotFound => None,
        }
    }
}

// ── Progress events ─────────────────────────────────────────────────

/// Messages posted by a running import to its supervisor.
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// File decoded; `total` data rows will be processed.
    Decoded { total: usize },
    /// One batch finished persisting.
    BatchDone {
        processed: usize,
        total: usize,
        inserted: usize,
        failures: Vec<RowFailure>,
    },
}

impl JobEvent {
    pub fn apply(self, job: &mut Job) {
        match self {
            JobEvent::Decoded { total } => {
                job.total_rows = total;
            }
            JobEvent::BatchDone {
                processed,
                total,
                inserted,
                failures,
            } => {
                job.total_rows = total;
                job.processed_rows = processed;
                job.inserted_count += inserted;
                job.failed_rows.extend(failures);
                job.progress = progress_percent(processed, total);
            }
        }
    }
}

/// `round(processed / total * 100)`, with an empty file counting as done.
pub fn progress_percent(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (processed.min(total) as f64 / total as f64 * 100.0).round();
    pct as u8
}

/// Broadcast to registry subscribers after every applied change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_serializes_snake_case() {
        for (variant, expected) in [
            (JobStatus::Pending, "pending"),
            (JobStatus::Processing, "processing"),
            (JobStatus::Completed, "completed"),
            (JobStatus::Failed, "failed"),
        ] {
            let json = serde_json::to_string(&variant).unwrap();
            assert_eq!(json, format!("\"{}\"", expected));
            assert_eq!(variant.as_str(), expected);
        }
    }

    #[test]
    fn progress_rounds_to_nearest_percent() {
        assert_eq!(progress_percent(500, 1200), 42);
        assert_eq!(progress_percent(1000, 1200), 83);
        assert_eq!(progress_percent(1200, 1200), 100);
        assert_eq!(progress_percent(0, 0), 100);
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 67);
    }

    #[test]
    fn batch_event_accumulates_counts() {
        let mut job = Job::new(Uuid::new_v4(), "products.csv");
        JobEvent::Decoded { total: 4 }.apply(&mut job);
        assert_eq!(job.total_rows, 4);

        let mut data = RawRow::new();
        data.insert("name".to_string(), json!(""));
        JobEvent::BatchDone {
            processed: 2,
            total: 4,
            inserted: 1,
            failures: vec![RowFailure { row: 2, data, reason: "missing required field: name".into() }],
        }
        .apply(&mut job);
        JobEvent::BatchDone { processed: 4, total: 4, inserted: 2, failures: vec![] }.apply(&mut job);

        assert_eq!(job.inserted_count, 3);
        assert_eq!(job.failed_count(), 1);
        assert_eq!(job.processed_rows, 4);
        assert_eq!(job.progress, 100);
    }

    fn failure(row: usize) -> RowFailure {
        RowFailure { row, data: RawRow::new(), reason: "missing required field: name".into() }
    }

    #[test]
    fn page_slices_failed_rows() {
        let mut job = Job::new(Uuid::new_v4(), "products.csv");
        job.failed_rows = (1..=5).map(failure).collect();

        let page = job.page(1, 2);
        assert_eq!(page.summary.failed_count, 5);
        assert_eq!(page.failures_offset, 1);
        let rows: Vec<usize> = page.failed_rows.iter().map(|f| f.row).collect();
        assert_eq!(rows, vec![2, 3]);

        assert!(job.page(10, 2).failed_rows.is_empty());
        assert_eq!(job.page(3, usize::MAX).failed_rows.len(), 2);
    }

    #[test]
    fn page_serializes_flat() {
        let mut job = Job::new(Uuid::new_v4(), "products.csv");
        job.failed_rows = vec![failure(4)];
        let json = serde_json::to_value(job.page(0, 10)).unwrap();
        assert_eq!(json["failedCount"], 1);
        assert_eq!(json["failuresOffset"], 0);
        assert_eq!(json["failedRows"][0]["row"], 4);
        assert!(json.get("summary").is_none());
    }

    #[test]
    fn job_serializes_camel_case() {
        let job = Job::new(Uuid::new_v4(), "products.xlsx");
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["insertedCount"], 0);
        assert_eq!(json["fileName"], "products.xlsx");
        assert!(json["failedRows"].as_array().unwrap().is_empty());
    }
}
