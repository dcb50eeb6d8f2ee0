//! Broadcast Client (§4.6): a thin, typed wrapper over the external
//! live-broadcast platform, with a real `reqwest`-based implementation and a
//! mock used both for tests and for `DISABLE_YOUTUBE_API=true` deployments.

mod client;
mod mock;

pub use client::YoutubeBroadcastClient;
pub use mock::MockBroadcastClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::StreamingJob;
use crate::Result;

/// Handles returned when a broadcast+stream pair is reserved (§3, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CreatedBroadcast {
    pub broadcast_id: String,
    pub stream_id: String,
    pub stream_key: String,
    pub stream_url: String,
    pub privacy_status: String,
    pub scheduled_start_time: DateTime<Utc>,
    pub channel_id: String,
    pub video_id: String,
}

/// Patch applied by `updateBroadcast` / the Metadata Debouncer (§4.5, §4.6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BroadcastMetadataPatch {
    pub title: Option<String>,
    pub description: Option<String>,
}

impl BroadcastMetadataPatch {
    /// Merge `other` into `self`, `other`'s fields taking priority when set —
    /// the same "merge the latest patch over the pending one" rule the
    /// Metadata Debouncer applies per job id (§4.5).
    pub fn merge(&mut self, other: BroadcastMetadataPatch) {
        if other.title.is_some() {
            self.title = other.title;
        }
        if other.description.is_some() {
            self.description = other.description;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none()
    }
}

/// Combined broadcast+stream health snapshot (§4.4, §4.6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BroadcastStatus {
    pub life_cycle_status: Option<String>,
    pub actual_end_time: Option<DateTime<Utc>>,
    pub stream_status: Option<String>,
}

impl BroadcastStatus {
    /// §4.4 step 2.
    pub fn ended(&self) -> bool {
        self.actual_end_time.is_some() || self.life_cycle_status.as_deref() == Some("complete")
    }

    /// §4.4 step 2.
    pub fn inactive(&self) -> bool {
        self.stream_status.as_deref() != Some("active")
    }
}

/// Privacy setting for a created broadcast (§6, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum StreamPrivacy {
    Public,
    Unlisted,
}

impl Default for StreamPrivacy {
    fn default() -> Self {
        StreamPrivacy::Unlisted
    }
}

impl StreamPrivacy {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamPrivacy::Public => "public",
            StreamPrivacy::Unlisted => "unlisted",
        }
    }
}

impl std::str::FromStr for StreamPrivacy {
    type Err = crate::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "public" => Ok(StreamPrivacy::Public),
            "unlisted" => Ok(StreamPrivacy::Unlisted),
            other => Err(crate::Error::validation(format!(
                "invalid privacy value: {other}"
            ))),
        }
    }
}

/// Contract over the external live-broadcast platform (§4.6).
///
/// Every method may fail with a transport or platform error; failures are
/// never fatal to the orchestrator process — callers translate them into job
/// errors or job events, log, and continue (§7 propagation policy).
#[async_trait]
pub trait BroadcastClient: Send + Sync {
    async fn create_live_broadcast(
        &self,
        title: &str,
        description: &str,
        privacy: StreamPrivacy,
    ) -> Result<CreatedBroadcast>;

    async fn update_broadcast(&self, broadcast_id: &str, patch: BroadcastMetadataPatch)
    -> Result<()>;

    async fn end_broadcast(&self, broadcast_id: &str) -> Result<()>;

    async fn get_broadcast_and_stream_status(
        &self,
        broadcast_id: &str,
        stream_id: &str,
    ) -> Result<BroadcastStatus>;

    /// Rotates the persisted OAuth refresh token without a process restart.
    async fn update_refresh_token(&self, new_token: String) -> Result<()>;
}

/// Ends the broadcast attached to a job, if any was ever provisioned;
/// swallows the error beyond logging it, since a terminal job transition must
/// never be blocked on the platform call succeeding (§7 propagation policy).
pub async fn end_broadcast_if_present(client: &dyn BroadcastClient, job: &StreamingJob) {
    let Some(broadcast_id) = job.stream_metadata.broadcast.broadcast_id.as_deref() else {
        return;
    };
    if let Err(error) = client.end_broadcast(broadcast_id).await {
        tracing::warn!(job_id = %job.job_id, broadcast_id, %error, "failed to end broadcast");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_merge_prefers_latest_nonempty_fields() {
        let mut pending = BroadcastMetadataPatch {
            title: Some("old title".into()),
            description: Some("old description".into()),
        };
        pending.merge(BroadcastMetadataPatch {
            title: Some("new title".into()),
            description: None,
        });
        assert_eq!(pending.title.as_deref(), Some("new title"));
        assert_eq!(pending.description.as_deref(), Some("old description"));
    }

    #[test]
    fn status_ended_and_inactive() {
        let status = BroadcastStatus {
            life_cycle_status: Some("complete".into()),
            actual_end_time: None,
            stream_status: Some("active".into()),
        };
        assert!(status.ended());
        assert!(!status.inactive());

        let status = BroadcastStatus {
            life_cycle_status: Some("live".into()),
            actual_end_time: None,
            stream_status: Some("inactive".into()),
        };
        assert!(!status.ended());
        assert!(status.inactive());
    }

    #[test]
    fn privacy_parses_from_str() {
        assert_eq!(
            "public".parse::<StreamPrivacy>().unwrap(),
            StreamPrivacy::Public
        );
        assert!("private".parse::<StreamPrivacy>().is_err());
    }
}
