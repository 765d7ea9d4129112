//! In-memory job registry shared by the runner and the status endpoints.
//!
//! Jobs are kept in insertion order for the lifetime of the process. Every
//! read copies what it needs under the lock, so callers never observe a job
//! halfway through an update. Polling reads ([`JobRegistry::snapshot`],
//! [`JobRegistry::summaries`]) copy only the requested failed rows.

use std::sync::{PoisonError, RwLock};

use indexmap::IndexMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::types::{Job, JobPage, JobStatus, JobSummary, JobView, ProgressUpdate};

const UPDATE_CHANNEL_CAPACITY: usize = 1024;

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Requested,
    NotFound,
    AlreadyFinished(JobStatus),
}

struct Entry {
    job: Job,
    cancel: CancellationToken,
}

pub struct JobRegistry {
    jobs: RwLock<IndexMap<Uuid, Entry>>,
    updates: broadcast::Sender<ProgressUpdate>,
}

impl JobRegistry {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            jobs: RwLock::new(IndexMap::new()),
            updates,
        }
    }

    /// Register a new `Pending` job and return its snapshot.
    pub fn create(&self, id: Uuid, file_name: &str) -> Job {
        let job = Job::new(id, file_name);
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        jobs.insert(
            id,
            Entry {
                job: job.clone(),
                cancel: CancellationToken::new(),
            },
        );
        job
    }

    /// Full copy of a job, failed rows included.
    pub fn get(&self, id: &Uuid) -> JobView {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        match jobs.get(id) {
            Some(entry) => JobView::Found(entry.job.clone()),
            None => JobView::NotFound,
        }
    }

    /// Apply `mutation` to a live job.
    ///
    /// Returns `false` when the id is unknown or the job is already terminal;
    /// the mutation is not run in either case. Progress is clamped so it never
    /// moves backwards and never exceeds 100.
    pub fn update<F>(&self, id: Uuid, mutation: F) -> bool
    where
        F: FnOnce(&mut Job),
    {
        let update = {
            let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
            let Some(entry) = jobs.get_mut(&id) else {
                return false;
            };
            if entry.job.is_terminal() {
                return false;
            }
            let floor = entry.job.progress;
            mutation(&mut entry.job);
            entry.job.progress = entry.job.progress.clamp(floor, 100);
            ProgressUpdate {
                id,
                status: entry.job.status,
                progress: entry.job.progress,
            }
        };
        // No subscribers is fine.
        let _ = self.updates.send(update);
        true
    }

    pub fn summary(&self, id: &Uuid) -> Option<JobSummary> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.get(id).map(|entry| entry.job.summary())
    }

    /// A job's counters plus one page of its failed rows.
    pub fn snapshot(&self, id: &Uuid, offset: usize, limit: usize) -> Option<JobPage> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.get(id).map(|entry| entry.job.page(offset, limit))
    }

    /// Summaries of all jobs, oldest first.
    pub fn summaries(&self) -> Vec<JobSummary> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.values().map(|entry| entry.job.summary()).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cancel_token(&self, id: &Uuid) -> Option<CancellationToken> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.get(id).map(|entry| entry.cancel.clone())
    }

    /// Ask a running job to stop before its next batch.
    pub fn cancel(&self, id: &Uuid) -> CancelOutcome {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        match jobs.get(id) {
            None => CancelOutcome::NotFound,
            Some(entry) if entry.job.is_terminal() => CancelOutcome::AlreadyFinished(entry.job.status),
            Some(entry) => {
                entry.cancel.cancel();
                CancelOutcome::Requested
            }
        }
    }

    /// Receive a [`ProgressUpdate`] for every applied change.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.updates.subscribe()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::bulk::types::RowFailure;

    #[test]
    fn create_then_get_returns_snapshot() {
        let registry = JobRegistry::new();
        let id = Uuid::new_v4();
        let created = registry.create(id, "products.csv");
        assert_eq!(created.status, JobStatus::Pending);

        let job = registry.get(&id).found().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.file_name, "products.csv");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_id_is_not_found() {
        let registry = JobRegistry::new();
        assert!(matches!(registry.get(&Uuid::new_v4()), JobView::NotFound));
        assert!(!registry.update(Uuid::new_v4(), |job| job.progress = 10));
        assert_eq!(registry.cancel(&Uuid::new_v4()), CancelOutcome::NotFound);
    }

    #[test]
    fn progress_never_decreases() {
        let registry = JobRegistry::new();
        let id = Uuid::new_v4();
        registry.create(id, "p.csv");

        assert!(registry.update(id, |job| job.progress = 40));
        assert!(registry.update(id, |job| job.progress = 20));
        assert_eq!(registry.get(&id).found().unwrap().progress, 40);

        assert!(registry.update(id, |job| job.progress = 250));
        assert_eq!(registry.get(&id).found().unwrap().progress, 100);
    }

    #[test]
    fn terminal_jobs_ignore_further_updates() {
        let registry = JobRegistry::new();
        let id = Uuid::new_v4();
        registry.create(id, "p.csv");

        assert!(registry.update(id, |job| job.status = JobStatus::Completed));
        assert!(!registry.update(id, |job| {
            job.status = JobStatus::Failed;
            job.error = Some("late".into());
        }));

        let job = registry.get(&id).found().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error.is_none());
    }

    #[test]
    fn cancel_signals_token_only_while_running() {
        let registry = JobRegistry::new();
        let id = Uuid::new_v4();
        registry.create(id, "p.csv");
        let token = registry.cancel_token(&id).unwrap();

        assert_eq!(registry.cancel(&id), CancelOutcome::Requested);
        assert!(token.is_cancelled());

        registry.update(id, |job| job.status = JobStatus::Failed);
        assert_eq!(
            registry.cancel(&id),
            CancelOutcome::AlreadyFinished(JobStatus::Failed)
        );
    }

    #[test]
    fn list_preserves_creation_order() {
        let registry = JobRegistry::new();
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            registry.create(*id, "p.csv");
        }
        let listed: Vec<Uuid> = registry.summaries().iter().map(|job| job.id).collect();
        assert_eq!(listed, ids);
    }

    #[test]
    fn snapshot_copies_only_the_requested_page() {
        let registry = JobRegistry::new();
        let id = Uuid::new_v4();
        registry.create(id, "p.csv");
        registry.update(id, |job| {
            job.failed_rows = (1..=10_000)
                .map(|row| RowFailure { row, data: Default::default(), reason: "bad".into() })
                .collect();
        });

        let page = registry.snapshot(&id, 9_998, 5).unwrap();
        assert_eq!(page.summary.failed_count, 10_000);
        let rows: Vec<usize> = page.failed_rows.iter().map(|f| f.row).collect();
        assert_eq!(rows, vec![9_999, 10_000]);
        assert_eq!(page.failed_rows.capacity(), 2);

        let summaries = registry.summaries();
        assert_eq!(summaries[0].failed_count, 10_000);
        assert!(registry.snapshot(&Uuid::new_v4(), 0, 5).is_none());
    }

    #[tokio::test]
    async fn subscribers_see_each_update() {
        let registry = JobRegistry::new();
        let mut updates = registry.subscribe();
        let id = Uuid::new_v4();
        registry.create(id, "p.csv");

        registry.update(id, |job| {
            job.status = JobStatus::Processing;
            job.progress = 50;
        });
        let update = updates.recv().await.unwrap();
        assert_eq!(update.id, id);
        assert_eq!(update.status, JobStatus::Processing);
        assert_eq!(update.progress, 50);
    }

    #[test]
    fn concurrent_readers_observe_monotonic_progress() {
        let registry = Arc::new(JobRegistry::new());
        let id = Uuid::new_v4();
        registry.create(id, "p.csv");

        let writer = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for pct in 0..=100u8 {
                    registry.update(id, |job| job.progress = pct);
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..500 {
                        let progress = registry.get(&id).found().unwrap().progress;
                        assert!(progress >= last);
                        last = progress;
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(registry.get(&id).found().unwrap().progress, 100);
    }
}
