//! [`JobStore`] implementation over PostgreSQL.

use std::time::Duration;

use async_trait::async_trait;
use ditchnet_core::job::{JobId, JobRecord, ModelVariant, NewJob};
use ditchnet_core::state::JobState;
use ditchnet_core::store::{retention_cutoff, JobStore, StoreError};

use crate::repositories::JobRepo;
use crate::DbPool;

/// PostgreSQL-backed job store. Cheap to clone (wraps the pool).
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: DbPool,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Map a sqlx error into the store contract, keeping unique violations apart.
fn store_error(err: sqlx::Error, id: Option<JobId>) -> StoreError {
    if let (sqlx::Error::Database(db_err), Some(id)) = (&err, id) {
        // PostgreSQL unique constraint violation: error code 23505
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::Duplicate(id);
        }
    }
    StoreError::unavailable(err)
}

fn corrupt(err: ditchnet_core::error::CoreError) -> StoreError {
    StoreError::Corrupt(err.to_string())
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: &NewJob) -> Result<(), StoreError> {
        JobRepo::insert(&self.pool, job)
            .await
            .map_err(|e| store_error(e, Some(job.id)))
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        let row = JobRepo::find_by_id(&self.pool, id.as_uuid())
            .await
            .map_err(|e| store_error(e, None))?;
        row.map(JobRecord::try_from).transpose().map_err(corrupt)
    }

    async fn get_state(&self, id: JobId) -> Result<Option<JobState>, StoreError> {
        let state = JobRepo::find_state(&self.pool, id.as_uuid())
            .await
            .map_err(|e| store_error(e, None))?;
        state.map(JobState::try_from).transpose().map_err(corrupt)
    }

    async fn get_model_variant(&self, id: JobId) -> Result<ModelVariant, StoreError> {
        let model = JobRepo::find_model(&self.pool, id.as_uuid())
            .await
            .map_err(|e| store_error(e, None))?
            .ok_or(StoreError::NotFound(id))?;
        ModelVariant::try_from(model).map_err(corrupt)
    }

    async fn count_by_state(&self, state: JobState) -> Result<i64, StoreError> {
        JobRepo::count_by_state(&self.pool, state)
            .await
            .map_err(|e| store_error(e, None))
    }

    async fn list_by_state(&self, state: JobState) -> Result<Vec<JobId>, StoreError> {
        let ids = JobRepo::list_by_state(&self.pool, state)
            .await
            .map_err(|e| store_error(e, None))?;
        Ok(ids.into_iter().map(JobId::from).collect())
    }

    async fn oldest_queued(&self) -> Result<Option<JobId>, StoreError> {
        let id = JobRepo::oldest_queued(&self.pool)
            .await
            .map_err(|e| store_error(e, None))?;
        Ok(id.map(JobId::from))
    }

    async fn set_state(&self, id: JobId, state: JobState) -> Result<bool, StoreError> {
        JobRepo::transition(&self.pool, id.as_uuid(), state)
            .await
            .map_err(|e| store_error(e, None))
    }

    async fn queue_position(&self, id: JobId) -> Result<Option<i64>, StoreError> {
        JobRepo::queue_position(&self.pool, id.as_uuid())
            .await
            .map_err(|e| store_error(e, None))
    }

    async fn list_stale_terminal(&self, retention: Duration) -> Result<Vec<JobId>, StoreError> {
        let ids = JobRepo::list_terminal_changed_before(&self.pool, retention_cutoff(retention))
            .await
            .map_err(|e| store_error(e, None))?;
        Ok(ids.into_iter().map(JobId::from).collect())
    }

    async fn delete(&self, id: JobId) -> Result<bool, StoreError> {
        JobRepo::delete_terminal(&self.pool, id.as_uuid())
            .await
            .map_err(|e| store_error(e, None))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        crate::health_check(&self.pool)
            .await
            .map_err(|e| store_error(e, None))
    }
}
