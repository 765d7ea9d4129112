//! Bulk import runner: spawns one execution unit per upload and a supervisor
//! that owns every registry write for that job.
//!
//! The execution unit decodes, validates and persists the file batch by batch.
//! It never touches the registry; it posts [`JobEvent`]s over a channel. The
//! supervisor applies those events and, once the unit has ended for any
//! reason (including a panic), writes the single terminal status. A cancel
//! request that lands after the last batch still ends the job as cancelled.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use tabload_core::config::BulkConfig;
use tabload_core::NewProduct;
use tabload_ingest::decode::decode_as;
use tabload_ingest::{detect_format, DecodeError, Normalizer, TabularFormat};
use tabload_storage::{is_remote_url, ImageRelocator, ProductStore};

use super::persister::{BatchPersister, PendingRecord};
use super::registry::JobRegistry;
use super::types::{JobEvent, JobStatus, JobView, RowFailure};

/// Error recorded on a job whose execution unit panicked or was aborted.
pub const WORKER_CRASHED: &str = "worker crashed";

/// A file handed over by the request layer.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Bytes,
}

/// Job-level failures; row-level problems never end up here.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("decode task failed: {0}")]
    DecodeTask(String),
    #[error("cancelled")]
    Cancelled,
}

#[derive(Clone)]
pub struct JobRunner {
    registry: Arc<JobRegistry>,
    store: Arc<dyn ProductStore>,
    images: Option<Arc<ImageRelocator>>,
    settings: BulkConfig,
}

impl JobRunner {
    pub fn new(registry: Arc<JobRegistry>, store: Arc<dyn ProductStore>, settings: BulkConfig) -> Self {
        Self {
            registry,
            store,
            images: None,
            settings,
        }
    }

    /// Copy remote product images into object storage before insert.
    pub fn with_image_relocator(mut self, images: Arc<ImageRelocator>) -> Self {
        self.images = Some(images);
        self
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Start an import and return its id without waiting for any row work.
    ///
    /// Only the file signature is checked here; an upload that cannot be a
    /// supported table is rejected before a job exists.
    pub fn submit(&self, upload: Upload) -> Result<Uuid, DecodeError> {
        self.launch(upload).map(|(id, _supervisor)| id)
    }

    /// Start an import and wait until its terminal status is written.
    pub async fn run_to_completion(&self, upload: Upload) -> Result<JobView, DecodeError> {
        let (id, supervisor) = self.launch(upload)?;
        if let Err(e) = supervisor.await {
            error!(job_id = %id, error = %e, "bulk import supervisor failed");
        }
        Ok(self.registry.get(&id))
    }

    fn launch(&self, upload: Upload) -> Result<(Uuid, JoinHandle<()>), DecodeError> {
        let format = detect_format(&upload.bytes, &upload.file_name)?;

        let id = Uuid::new_v4();
        self.registry.create(id, &upload.file_name);
        self.registry.update(id, |job| job.status = JobStatus::Processing);
        let cancel = self.registry.cancel_token(&id).unwrap_or_default();

        info!(
            job_id = %id,
            file = %upload.file_name,
            format = ?format,
            bytes = upload.bytes.len(),
            "bulk import started"
        );

        let (events, inbox) = mpsc::unbounded_channel();
        let unit = ExecutionUnit {
            job_id: id,
            store: self.store.clone(),
            images: self.images.clone(),
            settings: self.settings.clone(),
            events,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(unit.run(upload.bytes, format));
        let supervisor = tokio::spawn(supervise(self.registry.clone(), id, inbox, handle, cancel));
        Ok((id, supervisor))
    }
}

// ── Supervisor ──────────────────────────────────────────────────────

async fn supervise(
    registry: Arc<JobRegistry>,
    id: Uuid,
    mut inbox: mpsc::UnboundedReceiver<JobEvent>,
    unit: JoinHandle<Result<(), JobError>>,
    cancel: CancellationToken,
) {
    // The channel closes once the unit drops its sender: on return, on
    // error, and while unwinding from a panic.
    while let Some(event) = inbox.recv().await {
        registry.update(id, |job| event.apply(job));
    }

    match unit.await {
        Ok(Ok(())) => {
            // Checked under the registry write lock; `JobRegistry::cancel`
            // trips the token under the same lock, so an accepted cancel is
            // never followed by `completed`.
            registry.update(id, |job| {
                if cancel.is_cancelled() {
                    job.status = JobStatus::Failed;
                    job.error = Some(JobError::Cancelled.to_string());
                } else {
                    job.status = JobStatus::Completed;
                    job.progress = 100;
                    job.processed_rows = job.total_rows;
                }
                job.completed_at = Some(Utc::now());
            });
            if let Some(job) = registry.summary(&id) {
                info!(
                    job_id = %id,
                    status = job.status.as_str(),
                    total = job.total_rows,
                    inserted = job.inserted_count,
                    failed = job.failed_count,
                    "bulk import finished"
                );
            }
        }
        Ok(Err(e)) => {
            warn!(job_id = %id, error = %e, "bulk import failed");
            mark_failed(&registry, id, e.to_string());
        }
        Err(e) => {
            error!(job_id = %id, error = %e, panicked = e.is_panic(), "bulk import worker crashed");
            mark_failed(&registry, id, WORKER_CRASHED.to_string());
        }
    }
}

fn mark_failed(registry: &JobRegistry, id: Uuid, reason: String) {
    registry.update(id, |job| {
        job.status = JobStatus::Failed;
        job.error = Some(reason);
        job.completed_at = Some(Utc::now());
    });
}

// ── Execution unit ──────────────────────────────────────────────────

struct ExecutionUnit {
    job_id: Uuid,
    store: Arc<dyn ProductStore>,
    images: Option<Arc<ImageRelocator>>,
    settings: BulkConfig,
    events: mpsc::UnboundedSender<JobEvent>,
    cancel: CancellationToken,
}

impl ExecutionUnit {
    async fn run(self, bytes: Bytes, format: TabularFormat) -> Result<(), JobError> {
        let started = Instant::now();

        let rows = tokio::task::spawn_blocking(move || decode_as(&bytes, format))
            .await
            .map_err(|e| JobError::DecodeTask(e.to_string()))??;
        let total = rows.len();
        info!(job_id = %self.job_id, rows = total, "upload decoded");
        self.post(JobEvent::Decoded { total });

        let mut normalizer = Normalizer::new(self.store.clone(), self.settings.category_cache_size);
        let persister = BatchPersister::new(self.store.clone(), self.images.clone());
        let batch_size = self.settings.batch_size.max(1);
        let mut processed = 0usize;

        for (batch_index, chunk) in rows.chunks(batch_size).enumerate() {
            if self.cancel.is_cancelled() {
                info!(job_id = %self.job_id, processed, total, "bulk import cancelled");
                return Err(JobError::Cancelled);
            }

            let mut failures = Vec::new();
            let mut pending = Vec::with_capacity(chunk.len());
            for (offset, raw) in chunk.iter().enumerate() {
                let row = processed + offset + 1;
                let product = match normalizer.normalize(raw).await {
                    Ok(product) => product,
                    Err(rejection) => {
                        failures.push(RowFailure {
                            row,
                            data: raw.clone(),
                            reason: rejection.to_string(),
                        });
                        continue;
                    }
                };
                match self.relocate_image(product).await {
                    Ok((product, relocated_key)) => pending.push(PendingRecord {
                        row,
                        data: raw.clone(),
                        product,
                        relocated_key,
                    }),
                    Err(reason) => failures.push(RowFailure {
                        row,
                        data: raw.clone(),
                        reason,
                    }),
                }
            }

            let outcome = persister.persist(pending).await;
            failures.extend(outcome.failures);
            failures.sort_by_key(|f| f.row);
            processed += chunk.len();

            info!(
                job_id = %self.job_id,
                batch = batch_index + 1,
                processed,
                total,
                inserted = outcome.inserted,
                failed = failures.len(),
                "batch finished"
            );
            self.post(JobEvent::BatchDone {
                processed,
                total,
                inserted: outcome.inserted,
                failures,
            });
        }

        info!(
            job_id = %self.job_id,
            rows = total,
            duration_ms = started.elapsed().as_millis() as u64,
            "bulk import rows processed"
        );
        Ok(())
    }

    fn post(&self, event: JobEvent) {
        // The supervisor outlives the unit; a closed channel means the
        // process is shutting down.
        let _ = self.events.send(event);
    }

    /// Swap a remote `imageUrl` for a copy in object storage.
    ///
    /// Returns the relocated object key alongside the updated product, or
    /// the row failure reason.
    async fn relocate_image(&self, mut product: NewProduct) -> Result<(NewProduct, Option<String>), String> {
        let Some(images) = &self.images else {
            return Ok((product, None));
        };
        let Some(source) = product.image_url.clone().filter(|url| is_remote_url(url)) else {
            return Ok((product, None));
        };

        match images.relocate(&source).await {
            Ok(stored) => {
                product.image_url = Some(stored.url);
                product.image_key = Some(stored.key.clone());
                Ok((product, Some(stored.key)))
            }
            Err(e) => {
                warn!(job_id = %self.job_id, source = %source, error = %e, "image relocation failed");
                Err(format!("image relocation failed: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tabload_core::{Category, CategoryId, CategoryLookup, TabloadError};
    use tabload_storage::{CreateManyOutcome, FetchPolicy, MemoryStore, ObjectStorage, StoreError};
    use tokio::sync::Notify;

    use crate::bulk::types::{Job, ProgressUpdate};

    // ── Fakes ───────────────────────────────────────────────────────

    /// Delegates to a [`MemoryStore`] with hooks on `create_many`.
    struct ScriptedStore {
        inner: MemoryStore,
        calls: AtomicUsize,
        fail_on_call: Option<usize>,
        panic_on_call: Option<usize>,
        panic_on_lookup: bool,
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    impl ScriptedStore {
        fn new(inner: MemoryStore) -> Self {
            Self {
                inner,
                calls: AtomicUsize::new(0),
                fail_on_call: None,
                panic_on_call: None,
                panic_on_lookup: false,
                gate: None,
            }
        }
    }

    #[async_trait]
    impl CategoryLookup for ScriptedStore {
        async fn find_category_by_id(&self, id: CategoryId) -> Result<Option<Category>, TabloadError> {
            if self.panic_on_lookup {
                panic!("simulated lookup fault");
            }
            self.inner.find_category_by_id(id).await
        }
        async fn find_category_by_name(&self, name: &str) -> Result<Option<Category>, TabloadError> {
            self.inner.find_category_by_name(name).await
        }
    }

    #[async_trait]
    impl ProductStore for ScriptedStore {
        fn backend_name(&self) -> &'static str {
            "scripted"
        }

        async fn create_many(&self, products: &[NewProduct]) -> Result<CreateManyOutcome, StoreError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((entered, release)) = &self.gate {
                if call == 1 {
                    entered.notify_one();
                    release.notified().await;
                }
            }
            if self.panic_on_call == Some(call) {
                panic!("simulated worker fault");
            }
            if self.fail_on_call == Some(call) {
                return Err(StoreError::Unavailable("connection refused".into()));
            }
            self.inner.create_many(products).await
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn catalog() -> MemoryStore {
        MemoryStore::with_categories(["Furniture", "Electronics"])
    }

    fn settings(batch_size: usize) -> BulkConfig {
        BulkConfig {
            batch_size,
            ..BulkConfig::default()
        }
    }

    fn runner(store: Arc<dyn ProductStore>, batch_size: usize) -> JobRunner {
        JobRunner::new(Arc::new(JobRegistry::new()), store, settings(batch_size))
    }

    fn csv(lines: &[&str]) -> Upload {
        Upload {
            file_name: "products.csv".to_string(),
            bytes: Bytes::from(lines.join("\n")),
        }
    }

    fn generated_csv(rows: usize) -> Upload {
        let mut body = String::from("name,price,categoryId\n");
        for i in 1..=rows {
            body.push_str(&format!("Item {i},{i}.50,1\n"));
        }
        Upload {
            file_name: "generated.csv".to_string(),
            bytes: Bytes::from(body),
        }
    }

    async fn finish(runner: &JobRunner, upload: Upload) -> Job {
        runner.run_to_completion(upload).await.unwrap().found().unwrap()
    }

    // ── Scenarios ───────────────────────────────────────────────────

    #[tokio::test]
    async fn all_valid_rows_complete() {
        let store = Arc::new(catalog());
        let runner = runner(store.clone(), 500);

        let job = finish(
            &runner,
            csv(&["name,price,categoryId", "Desk,120,1", "Chair,45.5,1", "Lamp,19.99,2"]),
        )
        .await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.inserted_count, 3);
        assert!(job.failed_rows.is_empty());
        assert_eq!(job.total_rows, 3);
        assert!(job.completed_at.is_some());
        assert_eq!(store.product_count(), 3);
    }

    #[tokio::test]
    async fn missing_name_fails_only_that_row() {
        let runner = runner(Arc::new(catalog()), 500);
        let job = finish(&runner, csv(&["name,price,categoryId", "A,10,1", ",5,1"])).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.inserted_count, 1);
        assert_eq!(job.failed_rows.len(), 1);
        assert_eq!(job.failed_rows[0].row, 2);
        assert_eq!(job.failed_rows[0].reason, "missing required field: name");
        assert_eq!(job.failed_rows[0].data["price"], "5");
    }

    #[tokio::test]
    async fn category_resolves_by_name() {
        let store = Arc::new(catalog());
        let runner = runner(store.clone(), 500);
        let job = finish(&runner, csv(&["name,price,category", "TV,499,Electronics"])).await;

        assert_eq!(job.inserted_count, 1);
        assert!(job.failed_rows.is_empty());
        assert_eq!(store.products()[0].category_id, 2);
    }

    #[tokio::test]
    async fn progress_steps_through_each_batch() {
        let runner = runner(Arc::new(catalog()), 500);
        let mut updates = runner.registry().subscribe();

        let job = finish(&runner, generated_csv(1200)).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.inserted_count, 1200);

        let mut seen: Vec<ProgressUpdate> = Vec::new();
        while let Ok(update) = updates.try_recv() {
            if update.id == job.id {
                seen.push(update);
            }
        }
        let progress: Vec<u8> = seen.iter().map(|u| u.progress).collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
        for expected in [42, 83, 100] {
            assert!(progress.contains(&expected), "missing {expected} in {progress:?}");
        }
        assert_eq!(seen.last().unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn store_outage_fails_only_its_batch() {
        let mut scripted = ScriptedStore::new(catalog());
        scripted.fail_on_call = Some(2);
        let store = Arc::new(scripted);
        let runner = runner(store.clone(), 2);

        let job = finish(&runner, generated_csv(6)).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.inserted_count, 4);
        let failed: Vec<usize> = job.failed_rows.iter().map(|f| f.row).collect();
        assert_eq!(failed, vec![3, 4]);
        assert!(job.failed_rows.iter().all(|f| f.reason.contains("connection refused")));
        assert_eq!(job.inserted_count + job.failed_rows.len(), job.total_rows);
        assert_eq!(store.inner.product_count(), 4);
    }

    #[tokio::test]
    async fn worker_panic_still_reaches_failed() {
        let mut scripted = ScriptedStore::new(catalog());
        scripted.panic_on_call = Some(1);
        let runner = runner(Arc::new(scripted), 500);

        let job = finish(&runner, generated_csv(3)).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some(WORKER_CRASHED));
        assert!(job.completed_at.is_some());
        assert!(!runner.registry().update(job.id, |j| j.status = JobStatus::Completed));
    }

    #[tokio::test]
    async fn panic_before_first_batch_reaches_failed() {
        let mut scripted = ScriptedStore::new(catalog());
        scripted.panic_on_lookup = true;
        let store = Arc::new(scripted);
        let runner = runner(store.clone(), 500);

        let job = finish(&runner, generated_csv(3)).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some(WORKER_CRASHED));
        assert_eq!(job.processed_rows, 0);
        assert_eq!(job.inserted_count, 0);
        assert!(job.failed_rows.is_empty());
        assert!(job.completed_at.is_some());
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    // ── Edge cases ──────────────────────────────────────────────────

    #[tokio::test]
    async fn header_only_file_completes_empty() {
        let runner = runner(Arc::new(catalog()), 500);
        let job = finish(&runner, csv(&["name,price,categoryId"])).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.total_rows, 0);
        assert_eq!(job.inserted_count, 0);
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_before_job_exists() {
        let runner = runner(Arc::new(catalog()), 500);
        let upload = Upload {
            file_name: "products.xlsx".to_string(),
            bytes: Bytes::from_static(b"name,price\nDesk,1"),
        };

        assert!(matches!(runner.submit(upload), Err(DecodeError::CorruptSignature(_))));
        assert!(runner.registry().is_empty());
    }

    #[tokio::test]
    async fn undecodable_workbook_fails_job() {
        let runner = runner(Arc::new(catalog()), 500);
        let upload = Upload {
            file_name: "products.xlsx".to_string(),
            bytes: Bytes::from_static(b"PK\x03\x04not really a workbook"),
        };

        let job = finish(&runner, upload).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.is_some());
    }

    #[tokio::test]
    async fn submit_returns_before_rows_are_processed() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let mut scripted = ScriptedStore::new(catalog());
        scripted.gate = Some((entered.clone(), release.clone()));
        let runner = runner(Arc::new(scripted), 500);

        let id = runner.submit(generated_csv(3)).unwrap();
        let job = runner.registry().get(&id).found().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.progress, 0);

        entered.notified().await;
        release.notify_one();
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_batch() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let mut scripted = ScriptedStore::new(catalog());
        scripted.gate = Some((entered.clone(), release.clone()));
        let store = Arc::new(scripted);
        let runner = runner(store.clone(), 2);

        let background = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run_to_completion(generated_csv(6)).await })
        };

        entered.notified().await;
        let id = runner.registry().summaries()[0].id;
        assert_eq!(
            runner.registry().cancel(&id),
            crate::bulk::registry::CancelOutcome::Requested
        );
        release.notify_one();

        let job = background.await.unwrap().unwrap().found().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("cancelled"));
        assert_eq!(job.inserted_count, 2);
        assert_eq!(job.processed_rows, 2);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_during_last_batch_still_ends_cancelled() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let mut scripted = ScriptedStore::new(catalog());
        scripted.gate = Some((entered.clone(), release.clone()));
        let runner = runner(Arc::new(scripted), 500);

        let background = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run_to_completion(generated_csv(2)).await })
        };

        entered.notified().await;
        let id = runner.registry().summaries()[0].id;
        assert_eq!(
            runner.registry().cancel(&id),
            crate::bulk::registry::CancelOutcome::Requested
        );
        release.notify_one();

        let job = background.await.unwrap().unwrap().found().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("cancelled"));
        assert_eq!(job.inserted_count, 2);
        assert_eq!(job.processed_rows, 2);
    }

    #[tokio::test]
    async fn failed_image_relocation_fails_the_row() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Arc::new(ObjectStorage::local(tmp.path(), None).unwrap());
        let images = Arc::new(
            ImageRelocator::new(
                storage,
                "ProductImages",
                FetchPolicy {
                    timeout: std::time::Duration::from_secs(2),
                    max_bytes: 1024,
                    allowed_hosts: Vec::new(),
                },
            )
            .unwrap(),
        );
        let store = Arc::new(catalog());
        let runner = runner(store.clone(), 500).with_image_relocator(images);

        let job = finish(
            &runner,
            csv(&[
                "name,price,categoryId,imageUrl",
                "Desk,10,1,http://127.0.0.1:1/desk.png",
                "Chair,5,1,ProductImages/chair.png",
            ]),
        )
        .await;

        assert_eq!(job.inserted_count, 1);
        assert_eq!(job.failed_rows.len(), 1);
        assert_eq!(job.failed_rows[0].row, 1);
        assert!(job.failed_rows[0].reason.starts_with("image relocation failed"));
        assert_eq!(
            store.products()[0].image_url.as_deref(),
            Some("ProductImages/chair.png")
        );
    }

    #[tokio::test]
    async fn jobs_run_independently() {
        let store = Arc::new(catalog());
        let runner = runner(store.clone(), 10);

        let (a, b) = tokio::join!(
            runner.run_to_completion(generated_csv(25)),
            runner.run_to_completion(csv(&["name,price,categoryId", "Solo,1,2"]))
        );
        let a = a.unwrap().found().unwrap();
        let b = b.unwrap().found().unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(a.inserted_count, 25);
        assert_eq!(b.inserted_count, 1);
        assert_eq!(runner.registry().len(), 2);
    }
}
