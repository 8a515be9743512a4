//! Status reporting for external queries, including queue position.

use serde::Serialize;

use crate::job::JobId;
use crate::state::JobState;
use crate::store::{JobStore, StoreError};

/// State as reported to clients. `NotFound` is synthetic: it is never
/// stored, it only describes an id with no matching row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedState {
    Queued,
    Running,
    Complete,
    Failed,
    NotFound,
}

impl From<JobState> for ReportedState {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Queued => ReportedState::Queued,
            JobState::Running => ReportedState::Running,
            JobState::Complete => ReportedState::Complete,
            JobState::Failed => ReportedState::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub job_id: JobId,
    pub state: ReportedState,
    /// 0-based position in line; only set for queued jobs. Advisory: the
    /// dispatcher may advance the queue right after it is computed.
    pub position: Option<i64>,
    pub message: String,
}

/// Describe the current state of `id`.
///
/// A failed position lookup degrades to a message instead of an error.
pub async fn status_report(store: &dyn JobStore, id: JobId) -> Result<StatusReport, StoreError> {
    let Some(state) = store.get_state(id).await? else {
        return Ok(StatusReport {
            job_id: id,
            state: ReportedState::NotFound,
            position: None,
            message: "unknown job".into(),
        });
    };

    let (position, message) = match state {
        JobState::Queued => match store.queue_position(id).await {
            Ok(Some(pos)) => (Some(pos), format!("position in queue: {pos}")),
            Ok(None) => (None, "position in queue is unknown".into()),
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "Could not compute queue position");
                (None, "position in queue is unknown".into())
            }
        },
        JobState::Running => (None, "processing".into()),
        JobState::Complete => (None, "complete".into()),
        JobState::Failed => (None, "failed".into()),
    };

    Ok(StatusReport {
        job_id: id,
        state: state.into(),
        position,
        message,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ModelVariant, NewJob};
    use crate::store::memory::MemoryJobStore;

    async fn queued(store: &MemoryJobStore) -> JobId {
        let job = NewJob {
            id: JobId::new(),
            model_variant: ModelVariant::OneMetre,
            original_filename: "x.tif".into(),
        };
        store
            .insert_at(&job, chrono::Utc::now() + chrono::Duration::milliseconds(store.len().await as i64))
            .await
            .unwrap();
        job.id
    }

    #[tokio::test]
    async fn unknown_job_is_reported_as_not_found() {
        let store = MemoryJobStore::new();
        let report = status_report(&store, JobId::new()).await.unwrap();
        assert_eq!(report.state, ReportedState::NotFound);
        assert_eq!(report.message, "unknown job");
    }

    #[tokio::test]
    async fn queued_job_reports_its_position() {
        let store = MemoryJobStore::new();
        let first = queued(&store).await;
        let second = queued(&store).await;

        let report = status_report(&store, second).await.unwrap();
        assert_eq!(report.state, ReportedState::Queued);
        assert_eq!(report.position, Some(1));
        assert_eq!(report.message, "position in queue: 1");

        store.set_state(first, JobState::Running).await.unwrap();
        let report = status_report(&store, second).await.unwrap();
        assert_eq!(report.position, Some(0));

        let report = status_report(&store, first).await.unwrap();
        assert_eq!(report.state, ReportedState::Running);
        assert_eq!(report.position, None);
        assert_eq!(report.message, "processing");
    }

    #[tokio::test]
    async fn terminal_messages() {
        let store = MemoryJobStore::new();
        let id = queued(&store).await;
        store.set_state(id, JobState::Running).await.unwrap();
        store.set_state(id, JobState::Failed).await.unwrap();

        let report = status_report(&store, id).await.unwrap();
        assert_eq!(report.state, ReportedState::Failed);
        assert_eq!(report.message, "failed");
    }

    #[tokio::test]
    async fn unreachable_store_is_an_error() {
        let store = MemoryJobStore::new();
        store.set_unavailable(true);
        assert!(status_report(&store, JobId::new()).await.is_err());
    }
}
