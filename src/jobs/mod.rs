//! Job Store (§3, §4.2): the exclusive owner of every `StreamingJob`,
//! indexed by job id and by idempotency key, emitting change notifications
//! to UI subscribers.

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::{JobStatus, StreamingJob};

/// A note about something that happened to a job, distinct from a plain
/// status transition — restart requested/ready, pause/unpause failures,
/// broadcast completion/failure (§4.7).
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobNoteKind {
    RestartRequested,
    RestartReady,
    Stopped,
    MuteFailed,
    UnmuteFailed,
    PauseFailed,
    UnpauseFailed,
    BroadcastCompleted,
    BroadcastFailed,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct JobNote {
    pub job_id: String,
    pub kind: JobNoteKind,
    pub message: String,
    pub at: chrono::DateTime<Utc>,
}

impl JobNote {
    pub fn new(job_id: impl Into<String>, kind: JobNoteKind, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Default capacity for the job-change and job-note broadcast channels.
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// In-memory job store. Jobs are never deleted; terminal jobs remain
/// queryable for audit/UI purposes.
pub struct JobStore {
    jobs: DashMap<String, StreamingJob>,
    /// idempotencyKey -> jobId, pruned when the job reaches a terminal state
    /// so the key becomes reusable (§3 invariant: maps to at most one *live*
    /// job id).
    idempotency_index: DashMap<String, String>,
    job_tx: broadcast::Sender<StreamingJob>,
    note_tx: broadcast::Sender<JobNote>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (job_tx, _) = broadcast::channel(capacity);
        let (note_tx, _) = broadcast::channel(capacity);
        Self {
            jobs: DashMap::new(),
            idempotency_index: DashMap::new(),
            job_tx,
            note_tx,
        }
    }

    pub fn subscribe_jobs(&self) -> broadcast::Receiver<StreamingJob> {
        self.job_tx.subscribe()
    }

    pub fn subscribe_notes(&self) -> broadcast::Receiver<JobNote> {
        self.note_tx.subscribe()
    }

    pub fn emit_note(&self, note: JobNote) {
        let _ = self.note_tx.send(note);
    }

    fn publish(&self, job: &StreamingJob) {
        let _ = self.job_tx.send(job.clone());
    }

    /// Insert a freshly created job (`status=CREATED`) and index its
    /// idempotency key, if any.
    pub fn insert(&self, job: StreamingJob) {
        if let Some(key) = job.idempotency_key.clone() {
            self.idempotency_index.insert(key, job.job_id.clone());
        }
        self.publish(&job);
        self.jobs.insert(job.job_id.clone(), job);
    }

    pub fn get(&self, job_id: &str) -> Option<StreamingJob> {
        self.jobs.get(job_id).map(|e| e.value().clone())
    }

    pub fn list(&self) -> Vec<StreamingJob> {
        self.jobs.iter().map(|e| e.value().clone()).collect()
    }

    /// Live (non-terminal) job id for an idempotency key, if any (§3, §4.2
    /// create-path idempotent hit).
    pub fn find_live_by_idempotency_key(&self, key: &str) -> Option<StreamingJob> {
        let job_id = self.idempotency_index.get(key).map(|e| e.value().clone())?;
        let job = self.get(&job_id)?;
        if job.status.is_terminal() {
            None
        } else {
            Some(job)
        }
    }

    /// Mutate a job under its entry guard and publish the resulting view.
    /// Returns `None` if the job does not exist.
    pub fn update<F>(&self, job_id: &str, f: F) -> Option<StreamingJob>
    where
        F: FnOnce(&mut StreamingJob),
    {
        let mut entry = self.jobs.get_mut(job_id)?;
        f(&mut entry);
        let was_terminal = entry.status.is_terminal();
        let snapshot = entry.clone();
        drop(entry);

        if was_terminal {
            if let Some(key) = snapshot.idempotency_key.as_ref() {
                // Only drop the index if it still points at this job id —
                // a newer job may have reused the key in the interim.
                if self
                    .idempotency_index
                    .get(key)
                    .map(|e| e.value() == job_id)
                    .unwrap_or(false)
                {
                    self.idempotency_index.remove(key);
                }
            }
        }

        self.publish(&snapshot);
        debug!(job_id = %job_id, status = ?snapshot.status, "job updated");
        Some(snapshot)
    }

    /// Oldest `PENDING` job by `createdAt` ascending (§4.2 scheduler step 1).
    pub fn oldest_pending(&self) -> Option<StreamingJob> {
        self.jobs
            .iter()
            .filter(|e| e.value().status == JobStatus::Pending)
            .map(|e| e.value().clone())
            .min_by_key(|j| j.created_at)
    }

    /// All jobs currently `RUNNING` (candidates for the health monitor).
    pub fn running(&self) -> Vec<StreamingJob> {
        self.jobs
            .iter()
            .filter(|e| e.value().status == JobStatus::Running)
            .map(|e| e.value().clone())
            .collect()
    }

    /// Every job bound to `agent_id` that is not yet terminal (used to
    /// resolve an agent's `activeJob` on hello, and on heartbeat loss).
    pub fn jobs_for_agent(&self, agent_id: &str) -> Vec<StreamingJob> {
        self.jobs
            .iter()
            .filter(|e| e.value().agent_id.as_deref() == Some(agent_id) && !e.value().status.is_terminal())
            .map(|e| e.value().clone())
            .collect()
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedJobStore = Arc<JobStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{InlineConfig, JobError, RestartPolicy, StreamMetadata};

    fn sample_job(job_id: &str, idempotency_key: Option<&str>) -> StreamingJob {
        StreamingJob::new(
            job_id.to_string(),
            InlineConfig::Inline {
                inline_config: serde_json::json!({}),
            },
            idempotency_key.map(str::to_string),
            RestartPolicy::Never,
            "tester".to_string(),
            StreamMetadata::default(),
        )
    }

    #[test]
    fn idempotency_key_maps_to_live_job_only() {
        let store = JobStore::new();
        store.insert(sample_job("j1", Some("k")));

        assert_eq!(
            store.find_live_by_idempotency_key("k").unwrap().job_id,
            "j1"
        );

        store.update("j1", |j| j.fail(JobError::YOUTUBE_SETUP_FAILED, "boom"));
        assert!(store.find_live_by_idempotency_key("k").is_none());
    }

    #[test]
    fn oldest_pending_is_created_at_ascending() {
        let store = JobStore::new();
        let mut a = sample_job("a", None);
        a.set_status(JobStatus::Pending);
        a.created_at = Utc::now() - chrono::Duration::seconds(10);
        let mut b = sample_job("b", None);
        b.set_status(JobStatus::Pending);

        store.insert(b);
        store.insert(a);

        assert_eq!(store.oldest_pending().unwrap().job_id, "a");
    }

    #[test]
    fn update_publishes_and_returns_snapshot() {
        let store = JobStore::new();
        store.insert(sample_job("j1", None));
        let mut rx = store.subscribe_jobs();

        let updated = store
            .update("j1", |j| j.set_status(JobStatus::Pending))
            .unwrap();
        assert_eq!(updated.status, JobStatus::Pending);

        // insert() also published; drain it first.
        let _ = rx.try_recv();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.status, JobStatus::Pending);
    }
}
