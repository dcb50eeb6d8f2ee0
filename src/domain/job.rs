//! Job entity: a durable request to run a stream until stopped, and the
//! unit the scheduler matches against agents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exactly one of `templateId`/`inlineConfig` is set on creation (§3); this
/// type makes that an invariant of the representation rather than of two
/// `Option` fields that could both be `Some` or both be `None`.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase", untagged)]
pub enum InlineConfig {
    Template { template_id: String },
    Inline { inline_config: serde_json::Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum RestartPolicy {
    Never,
    OnFailure,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        RestartPolicy::Never
    }
}

/// Closed set of job statuses (§4.2). `Stopped`/`Failed`/`Canceled`/`Dismissed`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Created,
    Pending,
    Assigned,
    Accepted,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
    Unknown,
    Canceled,
    Dismissed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Stopped | JobStatus::Failed | JobStatus::Canceled | JobStatus::Dismissed
        )
    }

    /// Active for the purposes of the public status projection (§4.7).
    pub fn is_publicly_active(self) -> bool {
        matches!(
            self,
            JobStatus::Pending
                | JobStatus::Assigned
                | JobStatus::Accepted
                | JobStatus::Starting
                | JobStatus::Running
                | JobStatus::Stopping
        )
    }
}

/// Stable error code + human message attached to a terminal job (§7).
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct JobError {
    pub code: String,
    pub message: String,
}

impl JobError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub const AGENT_OFFLINE: &'static str = "AGENT_OFFLINE";
    pub const RATE_LIMIT_EXCEEDED: &'static str = "RATE_LIMIT_EXCEEDED";
    pub const JOB_CREATION_RATE_LIMIT: &'static str = "JOB_CREATION_RATE_LIMIT";
    pub const YOUTUBE_SETUP_FAILED: &'static str = "YOUTUBE_SETUP_FAILED";
    pub const STREAM_RESTART_EXCEEDED: &'static str = "STREAM_RESTART_EXCEEDED";
}

/// Handles returned by the broadcast platform when a broadcast+stream pair
/// is reserved for a job (§4.6).
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct BroadcastHandles {
    pub broadcast_id: Option<String>,
    pub stream_id: Option<String>,
    pub stream_key: Option<String>,
    pub stream_url: Option<String>,
    pub privacy_status: Option<String>,
    pub scheduled_start_time: Option<DateTime<Utc>>,
    pub channel_id: Option<String>,
    pub video_id: Option<String>,
}

/// Title/description plus broadcast handles and runtime flags (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct StreamMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_muted: bool,
    pub is_paused: bool,
    /// Free-form context the requester supplied (team names, sheet number,
    /// etc.); used to derive a title/description when none was given.
    #[serde(default)]
    pub stream_context: serde_json::Value,
    pub broadcast: BroadcastHandles,
}

/// Transient stream-health bookkeeping owned by the Stream Health Monitor
/// (§4.4). Lives on the job rather than in a side map because its lifetime
/// is exactly the job's lifetime.
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct JobHealth {
    pub first_inactive_at: Option<DateTime<Utc>>,
    pub next_restart_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    /// Set while a restart has been queued (stop dispatched or job returned
    /// to `PENDING` for re-binding) but not yet observed as stopped.
    pub pending_restart: bool,
}

impl JobHealth {
    pub fn clear_inactivity(&mut self) {
        self.first_inactive_at = None;
        self.next_restart_at = None;
    }

    /// Reset on a restart-cycle `AgentJobStopped`, keeping `attempts` so the
    /// backoff table bound is still enforced across cycles.
    pub fn reset_for_restart(&mut self) {
        self.first_inactive_at = None;
        self.next_restart_at = None;
        self.pending_restart = false;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct StreamingJob {
    pub job_id: String,
    pub config: InlineConfig,
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    pub requested_by: String,
    #[serde(default)]
    pub stream_metadata: StreamMetadata,

    pub status: JobStatus,
    pub agent_id: Option<String>,
    pub error: Option<JobError>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub health: JobHealth,
}

impl StreamingJob {
    pub fn new(
        job_id: String,
        config: InlineConfig,
        idempotency_key: Option<String>,
        restart_policy: RestartPolicy,
        requested_by: String,
        stream_metadata: StreamMetadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            config,
            idempotency_key,
            restart_policy,
            requested_by,
            stream_metadata,
            status: JobStatus::Created,
            agent_id: None,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            ended_at: None,
            health: JobHealth::default(),
        }
    }

    /// Minimal synthetic job for an agent-reported `activeJob` the store has
    /// never seen (design note "recovered jobs").
    pub fn recovered(job_id: String, agent_id: String) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            config: InlineConfig::Inline {
                inline_config: serde_json::Value::Null,
            },
            idempotency_key: None,
            restart_policy: RestartPolicy::Never,
            requested_by: "recovered".to_string(),
            stream_metadata: StreamMetadata::default(),
            status: JobStatus::Running,
            agent_id: Some(agent_id),
            error: None,
            created_at: now,
            updated_at: now,
            started_at: Some(now),
            ended_at: None,
            health: JobHealth::default(),
        }
    }

    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, code: &str, message: impl Into<String>) {
        self.error = Some(JobError::new(code, message));
        self.ended_at = Some(Utc::now());
        self.set_status(JobStatus::Failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Stopped.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Canceled.is_terminal());
        assert!(JobStatus::Dismissed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
    }

    #[test]
    fn recovered_job_has_no_template_and_never_restarts() {
        let job = StreamingJob::recovered("j1".into(), "a1".into());
        assert_eq!(job.requested_by, "recovered");
        assert_eq!(job.restart_policy, RestartPolicy::Never);
        assert_eq!(job.status, JobStatus::Running);
    }

    #[test]
    fn fail_sets_terminal_error_and_ended_at() {
        let mut job = StreamingJob::new(
            "j1".into(),
            InlineConfig::Inline {
                inline_config: serde_json::json!({}),
            },
            None,
            RestartPolicy::Never,
            "tester".into(),
            StreamMetadata::default(),
        );
        job.fail(JobError::YOUTUBE_SETUP_FAILED, "boom");
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.ended_at.is_some());
        assert_eq!(job.error.unwrap().code, "YOUTUBE_SETUP_FAILED");
    }
}
