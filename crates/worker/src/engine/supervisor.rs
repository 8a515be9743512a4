//! Execution supervisor.
//!
//! Owns one admitted job from the Queued→Running handoff until it reaches a
//! terminal state. The runner enforces the timeout; classification looks only
//! at whether the output artifact exists once the runner has returned.

use std::sync::Arc;
use std::time::Duration;

use ditchnet_core::job::{JobId, ModelVariant};
use ditchnet_core::paths::StorageRoot;
use ditchnet_core::runner::{JobRunner, ModelCatalog, RunRequest};
use ditchnet_core::state::JobState;
use ditchnet_core::store::{JobStore, StoreError};

/// How many times a terminal state write is attempted before giving up.
const RECORD_ATTEMPTS: u32 = 3;

/// Base delay between terminal write attempts; doubles each retry.
const RECORD_BACKOFF: Duration = Duration::from_millis(250);

/// Result of the Queued→Running handoff.
#[derive(Debug)]
pub enum Claim {
    /// The store recorded the job as Running.
    Claimed,
    /// The job was no longer Queued (another process took it, or it vanished).
    NotQueued,
    /// The Running write failed. The job is still executed.
    Unrecorded(StoreError),
}

impl Claim {
    /// Whether the job should go on to execution.
    pub fn proceed(&self) -> bool {
        !matches!(self, Claim::NotQueued)
    }
}

/// Runs jobs to completion and records their outcome.
pub struct ExecutionSupervisor {
    store: Arc<dyn JobStore>,
    runner: Arc<dyn JobRunner>,
    storage: StorageRoot,
    models: ModelCatalog,
    timeout: Duration,
}

impl ExecutionSupervisor {
    pub fn new(
        store: Arc<dyn JobStore>,
        runner: Arc<dyn JobRunner>,
        storage: StorageRoot,
        models: ModelCatalog,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            runner,
            storage,
            models,
            timeout,
        }
    }

    /// Move `id` from Queued to Running.
    ///
    /// A failed write is logged and reported as [`Claim::Unrecorded`]; the
    /// caller still owns the job and runs it.
    pub async fn claim(&self, id: JobId) -> Claim {
        match self.store.set_state(id, JobState::Running).await {
            Ok(true) => {
                tracing::info!(job_id = %id, "Job admitted");
                Claim::Claimed
            }
            Ok(false) => {
                tracing::warn!(job_id = %id, "Job was no longer queued, skipping");
                Claim::NotQueued
            }
            Err(e) => {
                tracing::error!(
                    job_id = %id,
                    error = %e,
                    "Failed to record job as running, executing anyway",
                );
                Claim::Unrecorded(e)
            }
        }
    }

    /// Run an already claimed job and record its terminal state.
    ///
    /// Returns the state the job was classified into, whether or not the
    /// store accepted the write.
    pub async fn execute(&self, id: JobId) -> JobState {
        let variant = match self.store.get_model_variant(id).await {
            Ok(variant) => variant,
            Err(e) => {
                let fallback = ModelVariant::default();
                tracing::warn!(
                    job_id = %id,
                    error = %e,
                    fallback = fallback.id(),
                    "Could not read model variant, using default",
                );
                fallback
            }
        };

        let paths = self.storage.job(id);
        let model = self.models.model_for(variant);
        let request = RunRequest::for_job(&paths, model, self.timeout);

        tracing::info!(
            job_id = %id,
            model,
            timeout_secs = self.timeout.as_secs(),
            "Running job",
        );

        match self.runner.run(request).await {
            Ok(report) => {
                if report.timed_out {
                    tracing::warn!(
                        job_id = %id,
                        timeout_secs = self.timeout.as_secs(),
                        "Job exceeded its timeout and was terminated",
                    );
                } else if !report.succeeded() {
                    tracing::warn!(
                        job_id = %id,
                        exit_code = ?report.exit_code,
                        "Runner exited unsuccessfully",
                    );
                }
                tracing::debug!(
                    job_id = %id,
                    exit_code = ?report.exit_code,
                    runner_saw_output = report.output_present,
                    report = %report,
                    output = %report.output,
                    "Runner finished",
                );
            }
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Runner invocation failed");
            }
        }

        let output_present = paths.output_present().await;
        let outcome = JobState::after_run(output_present);
        if output_present {
            tracing::info!(job_id = %id, "Job complete, output artifact produced");
        } else {
            tracing::warn!(
                job_id = %id,
                output = %paths.output_file.display(),
                "Job failed, output artifact missing",
            );
        }

        self.record_outcome(id, outcome).await;
        outcome
    }

    /// Classify jobs a previous process left in Running.
    ///
    /// Their runner is gone, so the output artifact alone decides the outcome.
    /// Returns how many jobs were reclassified.
    pub async fn recover_orphans(&self) -> usize {
        let orphans = match self.store.list_by_state(JobState::Running).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list orphaned running jobs");
                return 0;
            }
        };

        let mut recovered = 0;
        for id in orphans {
            let outcome = JobState::after_run(self.storage.job(id).output_present().await);
            tracing::warn!(
                job_id = %id,
                outcome = %outcome,
                "Recovering job left running by a previous process",
            );
            if self.record_outcome(id, outcome).await {
                recovered += 1;
            }
        }
        recovered
    }

    /// Write a terminal state with bounded retries. Returns `true` if the
    /// store ended up holding `outcome`.
    async fn record_outcome(&self, id: JobId, outcome: JobState) -> bool {
        let mut delay = RECORD_BACKOFF;
        for attempt in 1..=RECORD_ATTEMPTS {
            match self.store.set_state(id, outcome).await {
                Ok(true) => return true,
                Ok(false) => return self.repair_unrecorded_claim(id, outcome).await,
                Err(e) if attempt < RECORD_ATTEMPTS => {
                    tracing::warn!(
                        job_id = %id,
                        attempt,
                        error = %e,
                        "Failed to record job outcome, retrying",
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => {
                    tracing::error!(
                        job_id = %id,
                        outcome = %outcome,
                        error = %e,
                        "Giving up recording job outcome",
                    );
                }
            }
        }
        false
    }

    /// A terminal write matched nothing. If the Running write was lost the
    /// job is still Queued; replay Running so the outcome can follow it.
    async fn repair_unrecorded_claim(&self, id: JobId, outcome: JobState) -> bool {
        match self.store.get_state(id).await {
            Ok(Some(JobState::Queued)) => {
                tracing::info!(job_id = %id, "Replaying lost running transition");
                let replayed = matches!(self.store.set_state(id, JobState::Running).await, Ok(true))
                    && matches!(self.store.set_state(id, outcome).await, Ok(true));
                if !replayed {
                    tracing::error!(job_id = %id, outcome = %outcome, "Could not record job outcome");
                }
                replayed
            }
            Ok(Some(current)) => {
                tracing::warn!(
                    job_id = %id,
                    current = %current,
                    outcome = %outcome,
                    "Job not running, outcome not recorded",
                );
                current == outcome
            }
            Ok(None) => {
                tracing::warn!(job_id = %id, "Job disappeared before its outcome was recorded");
                false
            }
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Could not read job state");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
