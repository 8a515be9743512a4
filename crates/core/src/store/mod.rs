//! The Job Store contract.
//!
//! The scheduler, the reclaimer and the HTTP layer only see jobs through
//! [`JobStore`]. `ditchnet_db::PgJobStore` is the production implementation;
//! [`memory::MemoryJobStore`] backs tests and local experiments.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::job::{JobId, JobRecord, ModelVariant, NewJob};
use crate::state::JobState;

/// Errors raised by a [`JobStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store could not be reached or the query failed.
    #[error("Job store unavailable: {0}")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A row was read but could not be decoded into the domain model.
    #[error("Corrupt job row: {0}")]
    Corrupt(String),

    #[error("Job {0} not found")]
    NotFound(JobId),

    #[error("Job {0} already exists")]
    Duplicate(JobId),
}

impl StoreError {
    pub fn unavailable(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Unavailable(Box::new(err))
    }
}

/// Durable table of job records.
///
/// All methods are point queries or small scans; none of them block on job
/// execution.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job in state `Queued` with `added = changed = now`.
    async fn insert(&self, job: &NewJob) -> Result<(), StoreError>;

    /// Full row for `id`, or `None` if no such job exists.
    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError>;

    /// Current state of `id`, or `None` if no such job exists.
    async fn get_state(&self, id: JobId) -> Result<Option<JobState>, StoreError>;

    async fn get_model_variant(&self, id: JobId) -> Result<ModelVariant, StoreError>;

    async fn count_by_state(&self, state: JobState) -> Result<i64, StoreError>;

    /// Ids of every job in `state`, oldest `added` first.
    async fn list_by_state(&self, state: JobState) -> Result<Vec<JobId>, StoreError>;

    /// The Queued job with the smallest `added`, ties broken by id.
    async fn oldest_queued(&self) -> Result<Option<JobId>, StoreError>;

    /// Move `id` into `state` and stamp `changed = now`.
    ///
    /// The update only applies when the job currently sits in one of
    /// `state.predecessors()`. Returns `false` when nothing was updated.
    async fn set_state(&self, id: JobId, state: JobState) -> Result<bool, StoreError>;

    /// Number of Queued jobs with a strictly earlier `added` than `id`.
    ///
    /// `None` if the job does not exist.
    async fn queue_position(&self, id: JobId) -> Result<Option<i64>, StoreError>;

    /// Complete or Failed jobs whose `changed` is older than `now - retention`.
    async fn list_stale_terminal(&self, retention: Duration) -> Result<Vec<JobId>, StoreError>;

    /// Delete a terminal job row. Returns `false` if no terminal row matched.
    async fn delete(&self, id: JobId) -> Result<bool, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Convert a retention window into the `changed` cutoff it implies.
pub fn retention_cutoff(retention: Duration) -> crate::types::Timestamp {
    let window = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
    chrono::Utc::now()
        .checked_sub_signed(window)
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC)
}
