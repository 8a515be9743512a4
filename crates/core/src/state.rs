//! Job lifecycle state machine.
//!
//! ```text
//! Queued --(dispatcher selects)--> Running --(output present)--> Complete
//!                                          \--(otherwise)------> Failed
//! ```
//!
//! Transitions only ever move forward. Nothing returns a job to `Queued`
//! and failed jobs are never retried automatically.

use serde::Serialize;

use crate::error::CoreError;
use crate::types::SmallId;

/// Stored job state. The discriminant matches the `job_states` seed data.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued = 1,
    Running = 2,
    Complete = 3,
    Failed = 4,
}

/// States from which no further transition is possible.
pub const TERMINAL_STATES: [JobState; 2] = [JobState::Complete, JobState::Failed];

impl JobState {
    /// Return the database state ID.
    pub fn id(self) -> SmallId {
        self as SmallId
    }

    pub fn is_terminal(self) -> bool {
        TERMINAL_STATES.contains(&self)
    }

    /// States a job must currently be in to move into `self`.
    pub fn predecessors(self) -> &'static [JobState] {
        match self {
            JobState::Queued => &[],
            JobState::Running => &[JobState::Queued],
            JobState::Complete | JobState::Failed => &[JobState::Running],
        }
    }

    pub fn can_transition_to(self, next: JobState) -> bool {
        next.predecessors().contains(&self)
    }

    /// Classify a finished run. The output artifact is the only success
    /// signal; the process exit status is diagnostic.
    pub fn after_run(output_present: bool) -> JobState {
        if output_present {
            JobState::Complete
        } else {
            JobState::Failed
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Complete => "complete",
            JobState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<SmallId> for JobState {
    type Error = CoreError;

    fn try_from(value: SmallId) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(JobState::Queued),
            2 => Ok(JobState::Running),
            3 => Ok(JobState::Complete),
            4 => Ok(JobState::Failed),
            other => Err(CoreError::Internal(format!("Unknown job state id {other}"))),
        }
    }
}

/// Convert a list of states into their database IDs, for `= ANY($n)` binds.
pub fn state_ids(states: &[JobState]) -> Vec<SmallId> {
    states.iter().map(|s| s.id()).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
