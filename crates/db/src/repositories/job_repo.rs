//! Repository for the `jobs` table.
//!
//! Uses `JobState` from `ditchnet_core::state` for every state literal.
//! State changes are conditional updates so a job can only move forward.

use ditchnet_core::job::NewJob;
use ditchnet_core::state::{state_ids, JobState, TERMINAL_STATES};
use ditchnet_core::types::{SmallId, Timestamp};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::job::JobRow;

/// Column list for `jobs` queries.
const COLUMNS: &str = "job_id, state, model, original_filename, added, changed";

/// Provides queries and state transitions for processing jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new queued job.
    pub async fn insert(pool: &PgPool, job: &NewJob) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO jobs (job_id, state, model, original_filename) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(job.id.as_uuid())
        .bind(JobState::Queued.id())
        .bind(job.model_variant.id())
        .bind(&job.original_filename)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, job_id: Uuid) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE job_id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(job_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_state(pool: &PgPool, job_id: Uuid) -> Result<Option<SmallId>, sqlx::Error> {
        sqlx::query_scalar::<_, SmallId>("SELECT state FROM jobs WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_model(pool: &PgPool, job_id: Uuid) -> Result<Option<SmallId>, sqlx::Error> {
        sqlx::query_scalar::<_, SmallId>("SELECT model FROM jobs WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn count_by_state(pool: &PgPool, state: JobState) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM jobs WHERE state = $1")
            .bind(state.id())
            .fetch_one(pool)
            .await
    }

    pub async fn list_by_state(pool: &PgPool, state: JobState) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT job_id FROM jobs WHERE state = $1 ORDER BY added ASC, job_id ASC",
        )
        .bind(state.id())
        .fetch_all(pool)
        .await
    }

    /// The queued job that has waited longest. Ties on `added` fall back to
    /// the id so repeated calls agree.
    pub async fn oldest_queued(pool: &PgPool) -> Result<Option<Uuid>, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT job_id FROM jobs \
             WHERE state = $1 \
             ORDER BY added ASC, job_id ASC \
             LIMIT 1",
        )
        .bind(JobState::Queued.id())
        .fetch_optional(pool)
        .await
    }

    /// Move a job into `state` if it currently sits in a valid predecessor
    /// state, stamping `changed`. Returns `true` if a row was updated.
    pub async fn transition(
        pool: &PgPool,
        job_id: Uuid,
        state: JobState,
    ) -> Result<bool, sqlx::Error> {
        let from = state_ids(state.predecessors());
        if from.is_empty() {
            return Ok(false);
        }
        let result = sqlx::query(
            "UPDATE jobs SET state = $2, changed = NOW() \
             WHERE job_id = $1 AND state = ANY($3)",
        )
        .bind(job_id)
        .bind(state.id())
        .bind(&from)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Number of queued jobs added strictly before `job_id`, or `None` if the
    /// job does not exist.
    pub async fn queue_position(pool: &PgPool, job_id: Uuid) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT (SELECT COUNT(*) FROM jobs q WHERE q.state = $2 AND q.added < j.added) \
             FROM jobs j WHERE j.job_id = $1",
        )
        .bind(job_id)
        .bind(JobState::Queued.id())
        .fetch_optional(pool)
        .await
    }

    /// Terminal jobs whose last change is older than `cutoff`.
    pub async fn list_terminal_changed_before(
        pool: &PgPool,
        cutoff: Timestamp,
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT job_id FROM jobs \
             WHERE state = ANY($1) AND changed < $2 \
             ORDER BY changed ASC",
        )
        .bind(state_ids(&TERMINAL_STATES))
        .bind(cutoff)
        .fetch_all(pool)
        .await
    }

    /// Delete a job row, but only once it is terminal.
    pub async fn delete_terminal(pool: &PgPool, job_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM jobs WHERE job_id = $1 AND state = ANY($2)")
            .bind(job_id)
            .bind(state_ids(&TERMINAL_STATES))
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
