//! The job entity: identifier, model variant selector, and record types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::state::JobState;
use crate::types::{SmallId, Timestamp};

/// Opaque job identifier.
///
/// Assigned once at submission and used as the join key between the job
/// table, the per-job storage folder and the HTTP routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for JobId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for JobId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| CoreError::Validation(format!("'{s}' is not a valid job id")))
    }
}

/// Model selector chosen at submission.
///
/// The discriminant is the value submitted by clients and stored in the
/// `jobs.model` column.
#[repr(i16)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    /// Model trained on 0.5 m pixel resolution rasters.
    #[default]
    HalfMetre = 1,
    /// Model trained on 1 m pixel resolution rasters.
    OneMetre = 2,
}

impl ModelVariant {
    /// Return the database discriminant.
    pub fn id(self) -> SmallId {
        self as SmallId
    }
}

impl TryFrom<SmallId> for ModelVariant {
    type Error = CoreError;

    fn try_from(value: SmallId) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::HalfMetre),
            2 => Ok(Self::OneMetre),
            other => Err(CoreError::Validation(format!(
                "Unknown model variant {other}"
            ))),
        }
    }
}

impl FromStr for ModelVariant {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" => Ok(Self::HalfMetre),
            "2" => Ok(Self::OneMetre),
            _ => Err(CoreError::Validation(
                "Expected model '1' (0.5 m pixel resolution) or '2' (1 m pixel resolution)".into(),
            )),
        }
    }
}

/// A stored job row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRecord {
    pub id: JobId,
    pub state: JobState,
    pub model_variant: ModelVariant,
    pub original_filename: String,
    pub added: Timestamp,
    pub changed: Timestamp,
}

/// Everything needed to insert a new Queued job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: JobId,
    pub model_variant: ModelVariant,
    pub original_filename: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn job_id_round_trips_through_display() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(id.to_string().len(), 36);
    }

    #[test]
    fn job_id_rejects_non_uuid_tokens() {
        assert_matches!("../../etc".parse::<JobId>(), Err(CoreError::Validation(_)));
        assert_matches!("".parse::<JobId>(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn model_variant_parses_form_values() {
        assert_eq!("1".parse::<ModelVariant>().unwrap(), ModelVariant::HalfMetre);
        assert_eq!("2".parse::<ModelVariant>().unwrap(), ModelVariant::OneMetre);
        assert_matches!("3".parse::<ModelVariant>(), Err(CoreError::Validation(_)));
        assert_matches!("".parse::<ModelVariant>(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn model_variant_ids_match_seed_data() {
        assert_eq!(ModelVariant::HalfMetre.id(), 1);
        assert_eq!(ModelVariant::OneMetre.id(), 2);
        assert_eq!(ModelVariant::try_from(2).unwrap(), ModelVariant::OneMetre);
        assert!(ModelVariant::try_from(0).is_err());
    }
}
