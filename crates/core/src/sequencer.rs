//! Revision sequencer.
//!
//! One sequencer runs per directory. Each tick it claims the contiguous
//! batch of queued mutations past the last incorporated sequence number,
//! folds them through the validator against the authoritative leaves,
//! writes the accepted updates to the map as revision `r`, anchors the new
//! map root at log index `r`, and publishes to stream subscribers.
//!
//! A revision moves through `Building → MapWritten → LogAnchored →
//! Published`; only published revisions are observable. A started revision
//! is always driven to anchored: shutdown is honored between ticks, and
//! transient backend failures on the anchor step retry without bound (the
//! revision number is the fence that makes retries safe).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lattica_keydir_backend::{LogBackend, MapBackend, MapLeafUpdate, QueueStore};
use lattica_keydir_types::config::{DirectorySettings, RetryConfig};
use lattica_keydir_types::error::InternalSnafu;
use lattica_keydir_types::types::{
    vrf_input, DirectoryId, Index, QueuedUpdate, SignedLogRoot, SignedMapRoot,
};
use lattica_keydir_types::Result;
use lattica_keydir_vrf::VrfKeyPair;
use snafu::ensure;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audit::{AuditLogger, RejectedMutation};
use crate::validator;

/// Retry cap for read-side backend calls within one tick. The tick is
/// re-run anyway, so there is no need to insist here.
const MAX_TICK_RETRIES: u32 = 6;

/// Capacity of the publication broadcast channel.
const PUBLISH_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle of a revision under construction. Used for log visibility;
/// only [`RevisionState::Published`] is externally observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RevisionState {
    Building,
    MapWritten,
    LogAnchored,
    Published,
}

impl RevisionState {
    fn as_str(self) -> &'static str {
        match self {
            RevisionState::Building => "building",
            RevisionState::MapWritten => "map_written",
            RevisionState::LogAnchored => "log_anchored",
            RevisionState::Published => "published",
        }
    }
}

/// A published revision, broadcast to stream subscribers.
#[derive(Debug, Clone)]
pub struct PublishedRevision {
    /// The anchored map root.
    pub map_root: SignedMapRoot,
    /// The log root covering the anchor.
    pub log_root: SignedLogRoot,
}

/// Handle to a running sequencer.
pub struct SequencerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    publishes: broadcast::Sender<PublishedRevision>,
}

impl SequencerHandle {
    /// Subscribes to revision publications.
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedRevision> {
        self.publishes.subscribe()
    }

    /// The publication channel, for wiring additional subscribers.
    pub fn publisher(&self) -> broadcast::Sender<PublishedRevision> {
        self.publishes.clone()
    }

    /// Signals shutdown and waits for the in-flight revision to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.join.await {
            warn!(error = %err, "sequencer task panicked during shutdown");
        }
    }
}

/// The per-directory revision builder.
pub struct Sequencer {
    directory_id: DirectoryId,
    vrf: Arc<VrfKeyPair>,
    map: Arc<dyn MapBackend>,
    log: Arc<dyn LogBackend>,
    queue: Arc<dyn QueueStore>,
    settings: DirectorySettings,
    retry: RetryConfig,
    audit: Arc<dyn AuditLogger>,
    publishes: broadcast::Sender<PublishedRevision>,
}

impl Sequencer {
    /// Builds a sequencer publishing into `publishes`. Call
    /// [`Sequencer::spawn`] to start the loop.
    ///
    /// The publication channel is passed in (rather than owned) so a
    /// directory's read path stays subscribed across sequencer restarts.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        directory_id: DirectoryId,
        vrf: Arc<VrfKeyPair>,
        map: Arc<dyn MapBackend>,
        log: Arc<dyn LogBackend>,
        queue: Arc<dyn QueueStore>,
        settings: DirectorySettings,
        retry: RetryConfig,
        audit: Arc<dyn AuditLogger>,
        publishes: broadcast::Sender<PublishedRevision>,
    ) -> Self {
        Self { directory_id, vrf, map, log, queue, settings, retry, audit, publishes }
    }

    /// Creates a publication channel of the standard capacity.
    pub fn publish_channel() -> broadcast::Sender<PublishedRevision> {
        let (publishes, _) = broadcast::channel(PUBLISH_CHANNEL_CAPACITY);
        publishes
    }

    /// Spawns the control loop and returns its handle.
    pub fn spawn(self) -> SequencerHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let publishes = self.publishes.clone();
        let join = tokio::spawn(self.run(shutdown_rx));
        SequencerHandle { shutdown, join, publishes }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if let Err(err) = self.recover().await {
            warn!(
                directory_id = %self.directory_id,
                error = %err,
                "sequencer recovery failed; directory stays unsequenced"
            );
            return;
        }

        let mut activity = match self.queue.activity(&self.directory_id) {
            Ok(rx) => rx,
            Err(err) => {
                warn!(directory_id = %self.directory_id, error = %err, "queue unavailable");
                return;
            },
        };

        let mut last_built = Instant::now();
        loop {
            if *shutdown.borrow() {
                break;
            }

            let elapsed = last_built.elapsed();
            match self.gate(elapsed).await {
                Ok(GateDecision::Build) => {
                    match self.build_revision().await {
                        Ok(published) => {
                            last_built = Instant::now();
                            // Send fails only with no subscribers, which is fine
                            let _ = self.publishes.send(published);
                        },
                        Err(err) => {
                            warn!(
                                directory_id = %self.directory_id,
                                error = %err,
                                "revision build failed; will retry"
                            );
                            let backoff = self.retry.backoff_for_attempt(0);
                            tokio::time::sleep(jittered(backoff)).await;
                        },
                    }
                },
                Ok(GateDecision::Wait(until)) => {
                    tokio::select! {
                        _ = shutdown.changed() => {},
                        _ = activity.changed() => {},
                        _ = sleep_until(until) => {},
                    }
                },
                Err(err) => {
                    warn!(directory_id = %self.directory_id, error = %err, "gate check failed");
                    tokio::time::sleep(jittered(self.retry.backoff_for_attempt(0))).await;
                },
            }
        }

        info!(directory_id = %self.directory_id, "sequencer stopped");
    }

    /// Re-anchors map roots the log is missing, then restores the queue
    /// watermark. Idempotent; safe after any crash point.
    async fn recover(&self) -> Result<()> {
        let map_root = self.map.latest_root(&self.directory_id).await?;
        let mut log_size = self.log.latest_root(&self.directory_id).await?.tree_size;

        while log_size <= map_root.revision {
            let pending = self.map.root_at(&self.directory_id, log_size).await?;
            let (anchored_at, _) = self.log.append(&self.directory_id, &pending).await?;
            info!(
                directory_id = %self.directory_id,
                revision = pending.revision,
                log_index = anchored_at,
                "re-anchored map root after restart"
            );
            log_size += 1;
        }

        self.queue.advance(&self.directory_id, map_root.highest_fully_completed_seq).await?;
        Ok(())
    }

    /// Decides whether this tick builds a revision or waits.
    async fn gate(&self, elapsed: Duration) -> Result<GateDecision> {
        let queue_hwm = self.queue.high_water_mark(&self.directory_id).await?;
        let incorporated = self
            .map
            .latest_root(&self.directory_id)
            .await?
            .highest_fully_completed_seq;
        let pending = queue_hwm > incorporated;

        if pending && elapsed >= self.settings.min_interval {
            return Ok(GateDecision::Build);
        }
        if elapsed >= self.settings.max_interval && self.settings.publish_empty_revisions {
            return Ok(GateDecision::Build);
        }

        let wait = if pending {
            Some(self.settings.min_interval.saturating_sub(elapsed))
        } else if self.settings.publish_empty_revisions {
            Some(self.settings.max_interval.saturating_sub(elapsed))
        } else {
            // Quiet directory with empty revisions off: wake on enqueue only
            None
        };
        Ok(GateDecision::Wait(wait))
    }

    /// Builds, anchors, and publishes the next revision.
    async fn build_revision(&self) -> Result<PublishedRevision> {
        let mut state = RevisionState::Building;

        let prev_root = self
            .with_retry(MAX_TICK_RETRIES, "map latest root", || {
                self.map.latest_root(&self.directory_id)
            })
            .await?;
        let revision = prev_root.revision + 1;
        let prev_hwc = prev_root.highest_fully_completed_seq;

        let batch = self
            .with_retry(MAX_TICK_RETRIES, "queue read", || {
                self.queue.read_range(&self.directory_id, prev_hwc, self.settings.max_batch_size)
            })
            .await?;
        let new_hwc = batch.last().map(|queued| queued.seq).unwrap_or(prev_hwc);

        debug!(
            directory_id = %self.directory_id,
            revision,
            state = state.as_str(),
            batch = batch.len(),
            "claimed mutation batch"
        );

        let staged = self.stage_batch(revision, &batch).await?;

        let map_root = self
            .with_retry(MAX_TICK_RETRIES, "map write", || {
                self.map.set_leaves(&self.directory_id, revision, staged.clone(), new_hwc)
            })
            .await?;
        state = RevisionState::MapWritten;
        debug!(directory_id = %self.directory_id, revision, state = state.as_str(), "map written");

        // Anchor retries without bound: the revision is already in the map
        // and must reach the log before any new work starts.
        let (log_index, log_root) = self
            .with_retry(u32::MAX, "log anchor", || self.log.append(&self.directory_id, &map_root))
            .await?;
        ensure!(
            log_index == revision,
            InternalSnafu {
                message: format!(
                    "log assigned index {log_index} to revision {revision}; directory \
                     {} is misanchored",
                    self.directory_id
                ),
            }
        );
        state = RevisionState::LogAnchored;
        debug!(directory_id = %self.directory_id, revision, state = state.as_str(), "anchored");

        if let Err(err) = self.queue.advance(&self.directory_id, new_hwc).await {
            // Recovery restores the watermark from the map root
            warn!(directory_id = %self.directory_id, error = %err, "queue advance failed");
        }

        state = RevisionState::Published;
        info!(
            directory_id = %self.directory_id,
            revision,
            state = state.as_str(),
            mutations = staged.len(),
            highest_fully_completed_seq = new_hwc,
            "revision published"
        );

        Ok(PublishedRevision { map_root, log_root })
    }

    /// Validates a claimed batch against the authoritative leaves at
    /// `revision - 1` and stages the accepted writes.
    ///
    /// Mutations for the same index fold in queue order against the
    /// intermediate leaf, so intra-revision chains apply. Failures are
    /// recorded and dropped; the batch is consumed either way.
    async fn stage_batch(
        &self,
        revision: u64,
        batch: &[QueuedUpdate],
    ) -> Result<Vec<MapLeafUpdate>> {
        // Group by index, preserving queue order within each group
        let mut by_index: BTreeMap<Index, Vec<&QueuedUpdate>> = BTreeMap::new();
        for queued in batch {
            let input = vrf_input(&self.directory_id, &queued.update.user_id);
            let (index, _) = self.vrf.compute(&input);
            by_index.entry(index).or_default().push(queued);
        }

        let indexes: Vec<Index> = by_index.keys().copied().collect();
        let current_leaves = self
            .with_retry(MAX_TICK_RETRIES, "map read", || {
                self.map.get_leaves(&self.directory_id, revision - 1, &indexes)
            })
            .await?;

        let mut staged = Vec::new();
        for ((index, updates), current) in by_index.iter().zip(current_leaves.iter()) {
            let mut leaf = current.leaf.clone();
            let mut accepted: Option<MapLeafUpdate> = None;

            for queued in updates {
                match validator::validate_update(index, leaf.as_deref(), &queued.update) {
                    Ok(validated) => {
                        leaf = Some(validated.new_leaf.clone());
                        accepted = Some(MapLeafUpdate {
                            index: *index,
                            leaf: validated.new_leaf,
                            extra_data: validated.extra_data,
                        });
                    },
                    Err(err) => self.record_rejection(revision, queued, &err),
                }
            }

            if let Some(update) = accepted {
                staged.push(update);
            }
        }
        Ok(staged)
    }

    fn record_rejection(
        &self,
        revision: u64,
        queued: &QueuedUpdate,
        err: &validator::MutationError,
    ) {
        warn!(
            directory_id = %self.directory_id,
            revision,
            seq = queued.seq,
            user_id = %queued.update.user_id,
            reason = %err,
            "dropped mutation"
        );
        let event = RejectedMutation {
            directory_id: self.directory_id.to_string(),
            revision,
            seq: queued.seq,
            user_id: hex::encode(queued.update.user_id.as_bytes()),
            reason: err.to_string(),
            rejected_at: chrono::Utc::now(),
        };
        if let Err(audit_err) = self.audit.record(&event) {
            warn!(
                directory_id = %self.directory_id,
                error = %audit_err,
                "failed to record rejected mutation"
            );
        }
    }

    /// Retries `op` on retryable errors with capped exponential backoff
    /// plus jitter.
    async fn with_retry<T, Fut>(
        &self,
        max_attempts: u32,
        what: &str,
        mut op: impl FnMut() -> Fut,
    ) -> Result<T>
    where
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let backoff = jittered(self.retry.backoff_for_attempt(attempt));
                    warn!(
                        directory_id = %self.directory_id,
                        what,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "transient backend failure"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt = attempt.saturating_add(1);
                },
                Err(err) => return Err(err),
            }
        }
    }
}

enum GateDecision {
    Build,
    /// Sleep for the given duration (`None`: until queue activity).
    Wait(Option<Duration>),
}

/// Sleeps for `duration`, or forever when `None`.
async fn sleep_until(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

/// Adds up to 50% random jitter so concurrent retries decorrelate.
fn jittered(base: Duration) -> Duration {
    use rand::Rng;
    let jitter_ms = {
        let mut rng = rand::thread_rng();
        rng.gen_range(0..=base.as_millis().max(1) as u64 / 2)
    };
    base + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_bounded() {
        let base = Duration::from_millis(100);
        for _ in 0..50 {
            let value = jittered(base);
            assert!(value >= base);
            assert!(value <= base + Duration::from_millis(50));
        }
    }

    #[test]
    fn test_revision_state_names() {
        assert_eq!(RevisionState::Building.as_str(), "building");
        assert_eq!(RevisionState::Published.as_str(), "published");
    }
}
