//! In-process [`JobStore`] backed by a `HashMap`.
//!
//! Behaves like the PostgreSQL store (conditional transitions, FIFO by
//! `added`, terminal-only deletes) and additionally records every state a
//! job passed through, plus a switch to simulate an unreachable store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{retention_cutoff, JobStore, StoreError};
use crate::job::{JobId, JobRecord, ModelVariant, NewJob};
use crate::state::JobState;
use crate::types::Timestamp;

#[derive(Debug)]
struct Entry {
    record: JobRecord,
    /// Insertion order, used to break `added` ties deterministically.
    seq: u64,
    history: Vec<JobState>,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, Entry>,
    next_seq: u64,
}

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

#[derive(Debug, thiserror::Error)]
#[error("memory store switched offline")]
struct Offline;

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Insert a job with an explicit `added` timestamp.
    pub async fn insert_at(&self, job: &NewJob, added: Timestamp) -> Result<(), StoreError> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        if inner.jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.jobs.insert(
            job.id,
            Entry {
                record: JobRecord {
                    id: job.id,
                    state: JobState::Queued,
                    model_variant: job.model_variant,
                    original_filename: job.original_filename.clone(),
                    added,
                    changed: added,
                },
                seq,
                history: vec![JobState::Queued],
            },
        );
        Ok(())
    }

    /// Overwrite `changed` for a job, e.g. to age it past a retention window.
    pub async fn set_changed(&self, id: JobId, changed: Timestamp) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let entry = inner.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        entry.record.changed = changed;
        Ok(())
    }

    /// Every state `id` has been in, oldest first.
    pub async fn history(&self, id: JobId) -> Vec<JobState> {
        self.inner
            .lock()
            .await
            .jobs
            .get(&id)
            .map(|e| e.history.clone())
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::unavailable(Offline))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &NewJob) -> Result<(), StoreError> {
        self.insert_at(job, Utc::now()).await
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        self.check()?;
        Ok(self
            .inner
            .lock()
            .await
            .jobs
            .get(&id)
            .map(|e| e.record.clone()))
    }

    async fn get_state(&self, id: JobId) -> Result<Option<JobState>, StoreError> {
        Ok(self.get(id).await?.map(|r| r.state))
    }

    async fn get_model_variant(&self, id: JobId) -> Result<ModelVariant, StoreError> {
        self.get(id)
            .await?
            .map(|r| r.model_variant)
            .ok_or(StoreError::NotFound(id))
    }

    async fn count_by_state(&self, state: JobState) -> Result<i64, StoreError> {
        self.check()?;
        let inner = self.inner.lock().await;
        let count = inner
            .jobs
            .values()
            .filter(|e| e.record.state == state)
            .count();
        Ok(count as i64)
    }

    async fn list_by_state(&self, state: JobState) -> Result<Vec<JobId>, StoreError> {
        self.check()?;
        let inner = self.inner.lock().await;
        let mut matching: Vec<&Entry> = inner
            .jobs
            .values()
            .filter(|e| e.record.state == state)
            .collect();
        matching.sort_by_key(|e| (e.record.added, e.seq));
        Ok(matching.into_iter().map(|e| e.record.id).collect())
    }

    async fn oldest_queued(&self) -> Result<Option<JobId>, StoreError> {
        self.check()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .jobs
            .values()
            .filter(|e| e.record.state == JobState::Queued)
            .min_by_key(|e| (e.record.added, e.seq))
            .map(|e| e.record.id))
    }

    async fn set_state(&self, id: JobId, state: JobState) -> Result<bool, StoreError> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.jobs.get_mut(&id) else {
            return Ok(false);
        };
        if !entry.record.state.can_transition_to(state) {
            return Ok(false);
        }
        entry.record.state = state;
        entry.record.changed = Utc::now();
        entry.history.push(state);
        Ok(true)
    }

    async fn queue_position(&self, id: JobId) -> Result<Option<i64>, StoreError> {
        self.check()?;
        let inner = self.inner.lock().await;
        let Some(target) = inner.jobs.get(&id) else {
            return Ok(None);
        };
        let ahead = inner
            .jobs
            .values()
            .filter(|e| e.record.state == JobState::Queued && e.record.added < target.record.added)
            .count();
        Ok(Some(ahead as i64))
    }

    async fn list_stale_terminal(&self, retention: Duration) -> Result<Vec<JobId>, StoreError> {
        self.check()?;
        let cutoff = retention_cutoff(retention);
        let inner = self.inner.lock().await;
        let mut stale: Vec<&Entry> = inner
            .jobs
            .values()
            .filter(|e| e.record.state.is_terminal() && e.record.changed < cutoff)
            .collect();
        stale.sort_by_key(|e| (e.record.changed, e.seq));
        Ok(stale.into_iter().map(|e| e.record.id).collect())
    }

    async fn delete(&self, id: JobId) -> Result<bool, StoreError> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        match inner.jobs.get(&id) {
            Some(entry) if entry.record.state.is_terminal() => {
                inner.jobs.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.check()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
