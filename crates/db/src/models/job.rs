//! Row model for the `jobs` table.

use ditchnet_core::job::{JobRecord, ModelVariant};
use ditchnet_core::state::JobState;
use ditchnet_core::types::{SmallId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct JobRow {
    pub job_id: Uuid,
    pub state: SmallId,
    pub model: SmallId,
    pub original_filename: String,
    pub added: Timestamp,
    pub changed: Timestamp,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = ditchnet_core::error::CoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(JobRecord {
            id: row.job_id.into(),
            state: JobState::try_from(row.state)?,
            model_variant: ModelVariant::try_from(row.model)?,
            original_filename: row.original_filename,
            added: row.added,
            changed: row.changed,
        })
    }
}
