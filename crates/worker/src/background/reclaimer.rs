//! Periodic cleanup of finished jobs.
//!
//! Deletes the folder and store row of every Complete or Failed job whose
//! last state change is older than the retention window. Queued and Running
//! jobs are never touched.

use std::sync::Arc;
use std::time::Duration;

use ditchnet_core::paths::StorageRoot;
use ditchnet_core::store::JobStore;
use tokio_util::sync::CancellationToken;

/// Outcome of a single sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Terminal jobs past the retention window.
    pub stale: usize,
    /// Store rows actually deleted.
    pub deleted: usize,
    /// Jobs where folder or row removal failed.
    pub errors: usize,
}

pub struct Reclaimer {
    store: Arc<dyn JobStore>,
    storage: StorageRoot,
    retention: Duration,
    interval: Duration,
}

impl Reclaimer {
    pub fn new(
        store: Arc<dyn JobStore>,
        storage: StorageRoot,
        retention: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            storage,
            retention,
            interval,
        }
    }

    /// Run the retention loop until `cancel` is triggered.
    ///
    /// The first sweep happens immediately.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            retention_secs = self.retention.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Job reclaimer started"
        );

        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job reclaimer stopping");
                    break;
                }
                _ = interval.tick() => {
                    self.sweep().await;
                }
            }
        }
    }

    /// Delete every stale terminal job. Per-job failures are logged and the
    /// sweep moves on. A job whose folder could not be removed keeps its row,
    /// so the next sweep finds it again.
    pub async fn sweep(&self) -> SweepReport {
        let stale = match self.store.list_stale_terminal(self.retention).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(error = %e, "Job reclaimer: listing stale jobs failed");
                return SweepReport::default();
            }
        };

        let mut report = SweepReport {
            stale: stale.len(),
            ..SweepReport::default()
        };

        for id in stale {
            let paths = self.storage.job(id);
            if let Err(e) = paths.remove().await {
                report.errors += 1;
                tracing::error!(
                    job_id = %id,
                    folder = %paths.folder.display(),
                    error = %e,
                    "Job reclaimer: failed to remove job folder, keeping row for next sweep",
                );
                continue;
            }

            match self.store.delete(id).await {
                Ok(true) => report.deleted += 1,
                Ok(false) => {
                    tracing::debug!(job_id = %id, "Job reclaimer: row already gone");
                }
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(job_id = %id, error = %e, "Job reclaimer: failed to delete row");
                }
            }
        }

        if report.deleted > 0 {
            tracing::info!(
                deleted = report.deleted,
                errors = report.errors,
                "Job reclaimer: purged old jobs"
            );
        } else {
            tracing::debug!("Job reclaimer: no jobs to purge");
        }
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use ditchnet_core::job::{JobId, ModelVariant, NewJob};
    use ditchnet_core::state::JobState;
    use ditchnet_core::store::memory::MemoryJobStore;

    use super::*;

    const TWO_HOURS: Duration = Duration::from_secs(2 * 3600);

    async fn job_in(store: &MemoryJobStore, storage: &StorageRoot, state: JobState) -> JobId {
        let id = JobId::new();
        store
            .insert(&NewJob {
                id,
                model_variant: ModelVariant::HalfMetre,
                original_filename: "a.tif".into(),
            })
            .await
            .unwrap();
        storage.job(id).prepare().await.unwrap();
        if state != JobState::Queued {
            store.set_state(id, JobState::Running).await.unwrap();
        }
        if state.is_terminal() {
            store.set_state(id, state).await.unwrap();
        }
        id
    }

    #[tokio::test]
    async fn sweep_deletes_only_old_terminal_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageRoot::new(dir.path());
        let store = Arc::new(MemoryJobStore::new());

        let old_complete = job_in(&store, &storage, JobState::Complete).await;
        let old_failed = job_in(&store, &storage, JobState::Failed).await;
        let recent = job_in(&store, &storage, JobState::Complete).await;
        let old_running = job_in(&store, &storage, JobState::Running).await;

        let now = Utc::now();
        for id in [old_complete, old_failed, old_running] {
            store.set_changed(id, now - chrono::Duration::hours(3)).await.unwrap();
        }
        store.set_changed(recent, now - chrono::Duration::hours(1)).await.unwrap();

        let reclaimer = Reclaimer::new(store.clone(), storage.clone(), TWO_HOURS, TWO_HOURS);
        let report = reclaimer.sweep().await;

        assert_eq!(
            report,
            SweepReport {
                stale: 2,
                deleted: 2,
                errors: 0
            }
        );
        assert_eq!(store.get_state(old_complete).await.unwrap(), None);
        assert_eq!(store.get_state(old_failed).await.unwrap(), None);
        assert!(!storage.job(old_complete).folder.exists());
        assert!(storage.job(recent).folder.exists());
        assert!(storage.job(old_running).folder.exists());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn missing_folder_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageRoot::new(dir.path());
        let store = Arc::new(MemoryJobStore::new());
        let id = job_in(&store, &storage, JobState::Failed).await;
        storage.job(id).remove().await.unwrap();
        store.set_changed(id, Utc::now() - chrono::Duration::hours(3)).await.unwrap();

        let report = Reclaimer::new(store.clone(), storage, TWO_HOURS, TWO_HOURS)
            .sweep()
            .await;
        assert_eq!(report.deleted, 1);
        assert_eq!(report.errors, 0);
    }

    #[tokio::test]
    async fn failed_folder_removal_does_not_stop_the_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageRoot::new(dir.path());
        let store = Arc::new(MemoryJobStore::new());

        let first = job_in(&store, &storage, JobState::Complete).await;
        let stuck = job_in(&store, &storage, JobState::Failed).await;
        let last = job_in(&store, &storage, JobState::Complete).await;
        let now = Utc::now();
        for (id, hours) in [(first, 5), (stuck, 4), (last, 3)] {
            store.set_changed(id, now - chrono::Duration::hours(hours)).await.unwrap();
        }

        // A plain file where the job folder should be cannot be removed as a
        // directory.
        let stuck_folder = storage.job(stuck).folder;
        tokio::fs::remove_dir_all(&stuck_folder).await.unwrap();
        tokio::fs::write(&stuck_folder, b"not a folder").await.unwrap();

        let reclaimer = Reclaimer::new(store.clone(), storage.clone(), TWO_HOURS, TWO_HOURS);
        assert_eq!(
            reclaimer.sweep().await,
            SweepReport {
                stale: 3,
                deleted: 2,
                errors: 1
            }
        );
        assert_eq!(store.get_state(first).await.unwrap(), None);
        assert_eq!(store.get_state(last).await.unwrap(), None);
        assert!(!storage.job(last).folder.exists());
        assert_eq!(store.get_state(stuck).await.unwrap(), Some(JobState::Failed));

        // Once the obstruction is gone the next sweep finishes the job off.
        tokio::fs::remove_file(&stuck_folder).await.unwrap();
        assert_eq!(
            reclaimer.sweep().await,
            SweepReport {
                stale: 1,
                deleted: 1,
                errors: 0
            }
        );
        assert_eq!(store.get_state(stuck).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unavailable_store_yields_empty_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryJobStore::new());
        store.set_unavailable(true);

        let report = Reclaimer::new(store, StorageRoot::new(dir.path()), TWO_HOURS, TWO_HOURS)
            .sweep()
            .await;
        assert_eq!(report, SweepReport::default());
    }
}
