//! Metadata Debouncer (§4.5): coalesces rapid `title`/`description` updates
//! per job into a single delayed `updateBroadcast` call, the same way the
//! teacher's `UpdateCoalescer` batches configuration events — but debounced
//! (timer resets on every new patch) rather than flushed on a fixed tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::broadcast::{BroadcastClient, BroadcastMetadataPatch};

struct PendingEntry {
    patch: BroadcastMetadataPatch,
    /// Bumped on every `queue()` call for this job; a delayed flush only
    /// applies if the generation it captured is still current, which is how
    /// a newer patch implicitly cancels an older in-flight timer.
    generation: u64,
}

struct Inner {
    broadcast: Arc<dyn BroadcastClient>,
    delay: Duration,
    pending: Mutex<HashMap<String, PendingEntry>>,
}

#[derive(Clone)]
pub struct MetadataDebouncer {
    inner: Arc<Inner>,
}

impl MetadataDebouncer {
    pub fn new(broadcast: Arc<dyn BroadcastClient>, delay_ms: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                broadcast,
                delay: Duration::from_millis(delay_ms),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Merge `patch` into any pending patch for `job_id` and (re)arm the
    /// debounce timer. Safe to call repeatedly; only the last-merged patch
    /// within the window is ever sent.
    pub fn queue(&self, job_id: String, broadcast_id: String, patch: BroadcastMetadataPatch) {
        let generation = {
            let mut pending = self.inner.pending.lock();
            let entry = pending.entry(job_id.clone()).or_insert_with(|| PendingEntry {
                patch: BroadcastMetadataPatch::default(),
                generation: 0,
            });
            entry.patch.merge(patch);
            entry.generation += 1;
            entry.generation
        };

        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.inner.delay).await;
            this.try_flush(&job_id, generation, &broadcast_id).await;
        });
    }

    async fn try_flush(&self, job_id: &str, generation: u64, broadcast_id: &str) {
        let patch = {
            let mut pending = self.inner.pending.lock();
            match pending.get(job_id) {
                Some(entry) if entry.generation == generation => pending.remove(job_id).map(|e| e.patch),
                _ => None,
            }
        };
        let Some(patch) = patch else { return };
        if patch.is_empty() {
            return;
        }

        if let Err(error) = self.inner.broadcast.update_broadcast(broadcast_id, patch).await {
            warn!(job_id = %job_id, broadcast_id = %broadcast_id, %error, "debounced updateBroadcast call failed");
        }
    }

    /// Drops any pending patch for `job_id` without flushing it (§4.5: "on
    /// terminal job transition, cancel any pending timer and drop the
    /// patch"). The in-flight sleeping task still wakes up, but its
    /// generation check in `try_flush` will no longer match.
    pub fn cancel(&self, job_id: &str) {
        self.inner.pending.lock().remove(job_id);
    }

    /// Pending jobs with an unflushed patch, for observability/tests.
    pub fn pending_job_count(&self) -> usize {
        self.inner.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::MockBroadcastClient;

    #[tokio::test]
    async fn rapid_patches_coalesce_into_one_call() {
        let mock = MockBroadcastClient::wrapped();
        let created = mock
            .create_live_broadcast("t", "d", crate::broadcast::StreamPrivacy::Unlisted)
            .await
            .unwrap();
        let debouncer = MetadataDebouncer::new(mock.clone(), 30);

        debouncer.queue(
            "job-1".into(),
            created.broadcast_id.clone(),
            BroadcastMetadataPatch { title: Some("first".into()), description: None },
        );
        debouncer.queue(
            "job-1".into(),
            created.broadcast_id.clone(),
            BroadcastMetadataPatch { title: Some("second".into()), description: None },
        );

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(mock.update_call_count(&created.broadcast_id), 1);
        assert_eq!(
            mock.last_update(&created.broadcast_id).unwrap().title.as_deref(),
            Some("second")
        );
    }
}
