//! In-memory `BroadcastClient` double. Backs both `DISABLE_YOUTUBE_API=true`
//! deployments and the integration tests in `tests/` (§10.4) — the same
//! implementation serves both roles, per §4.6's "mock mode for testing".

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{BroadcastClient, BroadcastMetadataPatch, BroadcastStatus, CreatedBroadcast, StreamPrivacy};
use crate::Result;

#[derive(Debug, Clone, Default)]
struct MockBroadcastState {
    title: String,
    description: String,
    ended: bool,
    status: BroadcastStatus,
}

/// Deterministic mock: every call is recorded so tests can assert on call
/// counts (e.g. "at most one `updateBroadcast` with the last merged value").
#[derive(Default)]
struct Inner {
    broadcasts: HashMap<String, MockBroadcastState>,
    update_calls: HashMap<String, Vec<BroadcastMetadataPatch>>,
    end_calls: HashMap<String, u32>,
    /// When set, `create_live_broadcast` fails with this message instead of
    /// succeeding — used to exercise `YOUTUBE_SETUP_FAILED`.
    fail_create: bool,
    /// Forced status for `get_broadcast_and_stream_status`, keyed by
    /// broadcast id; overrides the state recorded at creation.
    forced_status: HashMap<String, BroadcastStatus>,
}

pub struct MockBroadcastClient {
    inner: Mutex<Inner>,
    counter: AtomicU64,
}

impl Default for MockBroadcastClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroadcastClient {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            counter: AtomicU64::new(0),
        }
    }

    pub fn wrapped() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Test hook: make the next `create_live_broadcast` call fail.
    pub fn set_fail_create(&self, fail: bool) {
        self.inner.lock().fail_create = fail;
    }

    /// Test hook: force the health status reported for a broadcast id.
    pub fn set_status(&self, broadcast_id: &str, status: BroadcastStatus) {
        self.inner
            .lock()
            .forced_status
            .insert(broadcast_id.to_string(), status);
    }

    /// Number of times `updateBroadcast` has been called for a broadcast id.
    pub fn update_call_count(&self, broadcast_id: &str) -> usize {
        self.inner
            .lock()
            .update_calls
            .get(broadcast_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// The last patch applied via `updateBroadcast`, if any.
    pub fn last_update(&self, broadcast_id: &str) -> Option<BroadcastMetadataPatch> {
        self.inner
            .lock()
            .update_calls
            .get(broadcast_id)
            .and_then(|calls| calls.last().cloned())
    }

    pub fn end_call_count(&self, broadcast_id: &str) -> u32 {
        self.inner
            .lock()
            .end_calls
            .get(broadcast_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn is_ended(&self, broadcast_id: &str) -> bool {
        self.inner
            .lock()
            .broadcasts
            .get(broadcast_id)
            .map(|s| s.ended)
            .unwrap_or(false)
    }
}

#[async_trait]
impl BroadcastClient for MockBroadcastClient {
    async fn create_live_broadcast(
        &self,
        title: &str,
        description: &str,
        privacy: StreamPrivacy,
    ) -> Result<CreatedBroadcast> {
        let mut inner = self.inner.lock();
        if inner.fail_create {
            return Err(crate::Error::BroadcastSetupFailed(
                "mock broadcast client configured to fail".to_string(),
            ));
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let broadcast_id = format!("mock-broadcast-{n}");
        let stream_id = format!("mock-stream-{n}");

        inner.broadcasts.insert(
            broadcast_id.clone(),
            MockBroadcastState {
                title: title.to_string(),
                description: description.to_string(),
                ended: false,
                status: BroadcastStatus {
                    life_cycle_status: Some("ready".to_string()),
                    actual_end_time: None,
                    stream_status: Some("active".to_string()),
                },
            },
        );

        Ok(CreatedBroadcast {
            broadcast_id,
            stream_id,
            stream_key: format!("mock-key-{n}"),
            stream_url: "rtmp://mock.invalid/live2".to_string(),
            privacy_status: privacy.as_str().to_string(),
            scheduled_start_time: Utc::now() + ChronoDuration::seconds(60),
            channel_id: "mock-channel".to_string(),
            video_id: format!("mock-video-{n}"),
        })
    }

    async fn update_broadcast(
        &self,
        broadcast_id: &str,
        patch: BroadcastMetadataPatch,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(state) = inner.broadcasts.get_mut(broadcast_id) {
            if let Some(title) = patch.title.clone() {
                state.title = title;
            }
            if let Some(description) = patch.description.clone() {
                state.description = description;
            }
        }
        inner
            .update_calls
            .entry(broadcast_id.to_string())
            .or_default()
            .push(patch);
        Ok(())
    }

    async fn end_broadcast(&self, broadcast_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(state) = inner.broadcasts.get_mut(broadcast_id) {
            state.ended = true;
            state.status.life_cycle_status = Some("complete".to_string());
        }
        *inner.end_calls.entry(broadcast_id.to_string()).or_insert(0) += 1;
        Ok(())
    }

    async fn get_broadcast_and_stream_status(
        &self,
        broadcast_id: &str,
        _stream_id: &str,
    ) -> Result<BroadcastStatus> {
        let inner = self.inner.lock();
        if let Some(status) = inner.forced_status.get(broadcast_id) {
            return Ok(status.clone());
        }
        Ok(inner
            .broadcasts
            .get(broadcast_id)
            .map(|s| s.status.clone())
            .unwrap_or_default())
    }

    async fn update_refresh_token(&self, _new_token: String) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_update_then_end() {
        let client = MockBroadcastClient::new();
        let created = client
            .create_live_broadcast("t", "d", StreamPrivacy::Unlisted)
            .await
            .unwrap();

        client
            .update_broadcast(
                &created.broadcast_id,
                BroadcastMetadataPatch {
                    title: Some("new title".into()),
                    description: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(client.update_call_count(&created.broadcast_id), 1);

        client.end_broadcast(&created.broadcast_id).await.unwrap();
        assert!(client.is_ended(&created.broadcast_id));
        assert_eq!(client.end_call_count(&created.broadcast_id), 1);
    }

    #[tokio::test]
    async fn fail_create_surfaces_broadcast_setup_failed() {
        let client = MockBroadcastClient::new();
        client.set_fail_create(true);
        let err = client
            .create_live_broadcast("t", "d", StreamPrivacy::Unlisted)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::BroadcastSetupFailed(_)));
    }
}
