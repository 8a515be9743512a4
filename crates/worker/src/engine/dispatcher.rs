//! Background job dispatcher.
//!
//! Polls the store every `poll_interval` and admits at most one queued job
//! per cycle, oldest first, while fewer than `max_concurrent_jobs` are
//! running. Admission awaits the Queued→Running write; execution is spawned
//! so the loop never waits on a runner.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use ditchnet_core::job::JobId;
use ditchnet_core::state::JobState;
use ditchnet_core::store::{JobStore, StoreError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::supervisor::ExecutionSupervisor;

/// Default polling interval for the dispatcher loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Background job dispatcher.
///
/// A single long-lived Tokio task. Each admitted job gets its own task,
/// tracked so shutdown can wait for in-flight executions.
pub struct JobDispatcher {
    store: Arc<dyn JobStore>,
    supervisor: Arc<ExecutionSupervisor>,
    poll_interval: Duration,
    max_concurrent_jobs: usize,
    in_flight: Arc<Mutex<HashSet<JobId>>>,
    tracker: TaskTracker,
}

impl JobDispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        supervisor: Arc<ExecutionSupervisor>,
        max_concurrent_jobs: usize,
    ) -> Self {
        Self {
            store,
            supervisor,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_concurrent_jobs,
            in_flight: Arc::default(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Tracker holding one task per executing job.
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Number of jobs this process is currently executing.
    pub fn in_flight(&self) -> usize {
        self.lock_in_flight().len()
    }

    /// Run the dispatcher loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            max_concurrent_jobs = self.max_concurrent_jobs,
            "Job dispatcher started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job dispatcher shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.dispatch_once().await;
                }
            }
        }
    }

    /// One dispatch cycle. Returns the admitted job, if any.
    ///
    /// Store errors are logged and end the cycle without admitting anything.
    pub async fn dispatch_once(&self) -> Option<JobId> {
        let running = match self.store.count_by_state(JobState::Running).await {
            Ok(n) => usize::try_from(n).unwrap_or(0),
            Err(e) => {
                tracing::error!(error = %e, "Failed to count running jobs");
                return None;
            }
        };

        // A job whose Running write was lost is invisible to the count.
        let busy = running.max(self.in_flight());
        if busy >= self.max_concurrent_jobs {
            tracing::trace!(busy, cap = self.max_concurrent_jobs, "All job slots taken");
            return None;
        }

        let id = match self.next_queued().await {
            Ok(Some(id)) => id,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!(error = %e, "Failed to select next queued job");
                return None;
            }
        };

        if !self.supervisor.claim(id).await.proceed() {
            self.lock_in_flight().remove(&id);
            return None;
        }

        let supervisor = Arc::clone(&self.supervisor);
        let in_flight = Arc::clone(&self.in_flight);
        self.tracker.spawn(async move {
            supervisor.execute(id).await;
            in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
        });

        Some(id)
    }

    /// Oldest Queued job not already executing here, now marked in flight.
    ///
    /// A job whose Running write was lost still reads as Queued; it is
    /// skipped so the jobs behind it are not held up.
    async fn next_queued(&self) -> Result<Option<JobId>, StoreError> {
        let Some(oldest) = self.store.oldest_queued().await? else {
            return Ok(None);
        };
        let newly_tracked = self.lock_in_flight().insert(oldest);
        if newly_tracked {
            return Ok(Some(oldest));
        }

        tracing::debug!(job_id = %oldest, "Oldest queued job already executing in this process");
        let queued = self.store.list_by_state(JobState::Queued).await?;
        let mut in_flight = self.lock_in_flight();
        Ok(queued.into_iter().find(|id| in_flight.insert(*id)))
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashSet<JobId>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
