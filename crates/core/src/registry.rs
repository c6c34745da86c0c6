//! Directory registry and admin operations.
//!
//! The registry is explicit process-wide state: it owns the backend
//! engines, holds one handle per directory (VRF key pair, root signers,
//! sequencer, read path), and implements the admin lifecycle — create,
//! soft delete, undelete, garbage collect. It is threaded through
//! constructors at startup rather than living in a global.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use lattica_keydir_backend::{
    Ed25519Signer, InMemoryLogBackend, InMemoryMapBackend, InMemoryQueueStore, LogBackend,
    MapBackend, QueueStore,
};
use lattica_keydir_types::config::{DirectorySettings, RetryConfig};
use lattica_keydir_types::types::{vrf_input, Directory, DirectoryId, EntryUpdate};
use lattica_keydir_types::{KeydirError, Result};
use lattica_keydir_vrf::VrfKeyPair;
use parking_lot::{Mutex, RwLock};
use rand::rngs::OsRng;
use tracing::{debug, info};

use crate::audit::AuditLogger;
use crate::keymaterial::{self, DirectoryKeyMaterial};
use crate::prover::Prover;
use crate::sequencer::{Sequencer, SequencerHandle};
use crate::validator;

/// Registry-wide policy knobs.
#[derive(Debug, Clone, bon::Builder)]
pub struct RegistryOptions {
    /// How long a soft-deleted directory is restorable before garbage
    /// collection may destroy it.
    #[builder(default = Duration::from_secs(7 * 24 * 60 * 60))]
    pub gc_grace: Duration,

    /// Backend retry policy handed to sequencers.
    #[builder(default)]
    pub retry: RetryConfig,

    /// Settings applied when a directory is created without its own.
    #[builder(default)]
    pub default_settings: DirectorySettings,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Per-directory runtime state.
pub struct DirectoryHandle {
    info: RwLock<Directory>,
    settings: DirectorySettings,
    vrf: Arc<VrfKeyPair>,
    prover: Prover,
    publishes: tokio::sync::broadcast::Sender<crate::sequencer::PublishedRevision>,
    sequencer: Mutex<Option<SequencerHandle>>,
}

impl DirectoryHandle {
    /// Snapshot of the directory metadata.
    pub fn info(&self) -> Directory {
        self.info.read().clone()
    }

    /// The read path for this directory.
    pub fn prover(&self) -> Prover {
        self.prover.clone()
    }

    /// Whether the sequencer loop is currently running.
    pub fn sequencer_running(&self) -> bool {
        self.sequencer.lock().is_some()
    }
}

/// Process-wide directory registry.
pub struct DirectoryRegistry {
    map: Arc<InMemoryMapBackend>,
    log: Arc<InMemoryLogBackend>,
    queue: Arc<InMemoryQueueStore>,
    audit: Arc<dyn AuditLogger>,
    options: RegistryOptions,
    directories: DashMap<DirectoryId, Arc<DirectoryHandle>>,
}

impl DirectoryRegistry {
    /// Builds a registry over fresh in-memory engines.
    pub fn new(audit: Arc<dyn AuditLogger>, options: RegistryOptions) -> Self {
        Self {
            map: Arc::new(InMemoryMapBackend::new()),
            log: Arc::new(InMemoryLogBackend::new()),
            queue: Arc::new(InMemoryQueueStore::new()),
            audit,
            options,
            directories: DashMap::new(),
        }
    }

    // ========================================================================
    // Admin surface
    // ========================================================================

    /// Creates a directory, provisions its backends, anchors the empty
    /// revision 0, and starts its sequencer.
    ///
    /// Caller-supplied key material is used when present; missing keys are
    /// generated.
    pub async fn create_directory(
        &self,
        directory_id: &str,
        settings: Option<DirectorySettings>,
        keys: Option<DirectoryKeyMaterial>,
    ) -> Result<Directory> {
        let directory_id = DirectoryId::parse(directory_id).ok_or_else(|| {
            KeydirError::invalid_argument(format!("invalid directory id: {directory_id:?}"))
        })?;
        if self.directories.contains_key(&directory_id) {
            return Err(KeydirError::invalid_argument(format!(
                "directory {directory_id} already exists"
            )));
        }

        let settings = settings.unwrap_or_else(|| self.options.default_settings.clone());
        settings.validate()?;

        let keys = keys.unwrap_or_default();
        let vrf = match &keys.vrf {
            Some(material) => keymaterial::decode_vrf(material)?,
            None => VrfKeyPair::generate(&mut OsRng),
        };
        let map_signer = match &keys.map_signer {
            Some(material) => keymaterial::decode_signer(material)?,
            None => Ed25519Signer::generate(&mut OsRng),
        };
        let log_signer = match &keys.log_signer {
            Some(material) => keymaterial::decode_signer(material)?,
            None => Ed25519Signer::generate(&mut OsRng),
        };

        let info = Directory {
            directory_id: directory_id.clone(),
            vrf_public_key: vrf.public_key().to_bytes().to_vec(),
            map_public_key: map_signer.public_key_bytes().to_vec(),
            log_public_key: log_signer.public_key_bytes().to_vec(),
            min_interval: settings.min_interval,
            max_interval: settings.max_interval,
            publish_empty_revisions: settings.publish_empty_revisions,
            created_at: Utc::now(),
            deleted_at: None,
        };

        // Provision storage and anchor the genesis revision
        self.queue.provision(&directory_id);
        let genesis = self.map.provision(&directory_id, map_signer);
        self.log.provision(&directory_id, log_signer);
        self.log.append(&directory_id, &genesis).await?;

        let vrf = Arc::new(vrf);
        let publishes = Sequencer::publish_channel();
        let prover = Prover::new(
            directory_id.clone(),
            Arc::clone(&vrf),
            self.map.clone() as Arc<dyn MapBackend>,
            self.log.clone() as Arc<dyn LogBackend>,
            self.queue.clone() as Arc<dyn QueueStore>,
            publishes.clone(),
        );

        let handle = Arc::new(DirectoryHandle {
            info: RwLock::new(info.clone()),
            settings: settings.clone(),
            vrf,
            prover,
            publishes,
            sequencer: Mutex::new(None),
        });
        self.spawn_sequencer(&directory_id, &handle);
        self.directories.insert(directory_id.clone(), handle);

        info!(directory_id = %directory_id, "directory created");
        Ok(info)
    }

    /// Metadata for one directory, deleted or not.
    pub fn get_directory(&self, directory_id: &DirectoryId) -> Result<Directory> {
        self.directories
            .get(directory_id)
            .map(|handle| handle.info())
            .ok_or_else(|| KeydirError::DirectoryNotFound { directory_id: directory_id.clone() })
    }

    /// Metadata for all directories. Soft-deleted directories are included
    /// only when `show_deleted` is set.
    pub fn list_directories(&self, show_deleted: bool) -> Vec<Directory> {
        let mut all: Vec<Directory> = self
            .directories
            .iter()
            .map(|entry| entry.value().info())
            .filter(|info| show_deleted || !info.is_deleted())
            .collect();
        all.sort_by(|a, b| a.directory_id.cmp(&b.directory_id));
        all
    }

    /// Soft-deletes a directory: stops its sequencer and marks it deleted.
    /// State is retained until [`DirectoryRegistry::garbage_collect`] runs
    /// past the grace period.
    pub async fn delete_directory(&self, directory_id: &DirectoryId) -> Result<Directory> {
        let handle = self.live_handle(directory_id)?;

        handle.info.write().deleted_at = Some(Utc::now());
        let sequencer = handle.sequencer.lock().take();
        if let Some(sequencer) = sequencer {
            sequencer.stop().await;
        }

        info!(directory_id = %directory_id, "directory soft-deleted");
        Ok(handle.info())
    }

    /// Restores a soft-deleted directory and restarts its sequencer.
    pub fn undelete_directory(&self, directory_id: &DirectoryId) -> Result<Directory> {
        let handle = self
            .directories
            .get(directory_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| KeydirError::DirectoryNotFound { directory_id: directory_id.clone() })?;

        {
            let mut info = handle.info.write();
            match info.deleted_at {
                None => {
                    return Err(KeydirError::invalid_argument(format!(
                        "directory {directory_id} is not deleted"
                    )))
                },
                Some(deleted_at) => {
                    let cutoff = deleted_at
                        + chrono::Duration::from_std(self.options.gc_grace).unwrap_or_default();
                    if Utc::now() >= cutoff {
                        return Err(KeydirError::invalid_argument(format!(
                            "directory {directory_id} is past its restore window"
                        )));
                    }
                    info.deleted_at = None;
                },
            }
        }

        self.spawn_sequencer(directory_id, &handle);
        info!(directory_id = %directory_id, "directory restored");
        Ok(handle.info())
    }

    /// Destroys directories whose soft-delete grace period has lapsed.
    /// Returns the ids that were purged.
    pub async fn garbage_collect(&self) -> Vec<DirectoryId> {
        let grace = chrono::Duration::from_std(self.options.gc_grace).unwrap_or_default();
        let now = Utc::now();

        let expired: Vec<DirectoryId> = self
            .directories
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .info
                    .read()
                    .deleted_at
                    .map(|deleted_at| now >= deleted_at + grace)
                    .unwrap_or(false)
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut purged = Vec::new();
        for directory_id in expired {
            if let Some((_, handle)) = self.directories.remove(&directory_id) {
                let sequencer = handle.sequencer.lock().take();
                if let Some(sequencer) = sequencer {
                    sequencer.stop().await;
                }
                self.map.remove(&directory_id);
                self.log.remove(&directory_id);
                self.queue.remove(&directory_id);
                info!(directory_id = %directory_id, "directory garbage-collected");
                purged.push(directory_id);
            }
        }
        purged
    }

    /// Stops every sequencer. Called at process shutdown; in-flight
    /// revisions finish first.
    pub async fn shutdown(&self) {
        let handles: Vec<Arc<DirectoryHandle>> =
            self.directories.iter().map(|entry| Arc::clone(entry.value())).collect();
        for handle in handles {
            let sequencer = handle.sequencer.lock().take();
            if let Some(sequencer) = sequencer {
                sequencer.stop().await;
            }
        }
    }

    // ========================================================================
    // Write path
    // ========================================================================

    /// Validates an update against a candidate view of the current leaf
    /// and enqueues it for sequencing.
    ///
    /// Acceptance here is necessary but not sufficient: the leaf may change
    /// before sequencing, so the sequencer re-validates at apply time.
    /// Clients observe acceptance by polling the read path.
    pub async fn queue_entry_update(
        &self,
        directory_id: &DirectoryId,
        update: EntryUpdate,
    ) -> Result<()> {
        let handle = self.live_handle(directory_id)?;

        let input = vrf_input(directory_id, &update.user_id);
        let (index, _) = handle.vrf.compute(&input);

        let latest = handle.prover.latest_revision().await?;
        let mut leaves = self.map.get_leaves(directory_id, latest, &[index]).await?;
        let current = leaves.pop().and_then(|leaf| leaf.leaf);

        validator::validate_update(&index, current.as_deref(), &update)
            .map_err(KeydirError::from)?;

        let seq = self.queue.enqueue(directory_id, update).await?;
        debug!(directory_id = %directory_id, seq, "update queued");
        Ok(())
    }

    /// Queues a batch of updates, validating each independently. Returns
    /// one result per update, in request order.
    pub async fn batch_queue_user_updates(
        &self,
        directory_id: &DirectoryId,
        updates: Vec<EntryUpdate>,
    ) -> Result<Vec<Result<()>>> {
        // Surface directory-level failures once, before per-item work
        self.live_handle(directory_id)?;

        let mut results = Vec::with_capacity(updates.len());
        for update in updates {
            results.push(self.queue_entry_update(directory_id, update).await);
        }
        Ok(results)
    }

    // ========================================================================
    // Read path access
    // ========================================================================

    /// The read path for a live directory.
    pub fn prover(&self, directory_id: &DirectoryId) -> Result<Prover> {
        Ok(self.live_handle(directory_id)?.prover())
    }

    /// The runtime handle for a live directory.
    pub fn handle(&self, directory_id: &DirectoryId) -> Result<Arc<DirectoryHandle>> {
        self.live_handle(directory_id)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn live_handle(&self, directory_id: &DirectoryId) -> Result<Arc<DirectoryHandle>> {
        let handle = self
            .directories
            .get(directory_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| KeydirError::DirectoryNotFound { directory_id: directory_id.clone() })?;
        if handle.info.read().is_deleted() {
            return Err(KeydirError::DirectoryNotFound { directory_id: directory_id.clone() });
        }
        Ok(handle)
    }

    /// Starts the single sequencer for a directory. The slot in the handle
    /// is the in-process lease: a second spawn for the same directory is a
    /// no-op while one is running.
    fn spawn_sequencer(&self, directory_id: &DirectoryId, handle: &Arc<DirectoryHandle>) {
        let mut slot = handle.sequencer.lock();
        if slot.is_some() {
            return;
        }

        let sequencer = Sequencer::new(
            directory_id.clone(),
            Arc::clone(&handle.vrf),
            self.map.clone() as Arc<dyn MapBackend>,
            self.log.clone() as Arc<dyn LogBackend>,
            self.queue.clone() as Arc<dyn QueueStore>,
            handle.settings.clone(),
            self.options.retry.clone(),
            Arc::clone(&self.audit),
            handle.publishes.clone(),
        );
        *slot = Some(sequencer.spawn());
    }
}

/// Convenience: queues a single update and returns the assigned sequence
/// number, for tests that need to observe queue positions.
impl DirectoryRegistry {
    #[doc(hidden)]
    pub async fn enqueue_raw(
        &self,
        directory_id: &DirectoryId,
        update: EntryUpdate,
    ) -> Result<u64> {
        self.live_handle(directory_id)?;
        self.queue.enqueue(directory_id, update).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::audit::MemoryAuditLogger;

    fn registry() -> DirectoryRegistry {
        DirectoryRegistry::new(Arc::new(MemoryAuditLogger::new()), RegistryOptions::default())
    }

    #[tokio::test]
    async fn test_create_anchors_genesis_revision() {
        let registry = registry();
        let info = registry.create_directory("d1", None, None).await.unwrap();

        assert_eq!(info.directory_id.as_str(), "d1");
        assert!(!info.is_deleted());

        let prover = registry.prover(&info.directory_id).unwrap();
        assert_eq!(prover.latest_revision().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_and_bad_ids() {
        let registry = registry();
        registry.create_directory("d1", None, None).await.unwrap();

        assert!(matches!(
            registry.create_directory("d1", None, None).await.unwrap_err(),
            KeydirError::InvalidArgument { .. }
        ));
        assert!(matches!(
            registry.create_directory("bad id!", None, None).await.unwrap_err(),
            KeydirError::InvalidArgument { .. }
        ));
    }

    #[tokio::test]
    async fn test_delete_hides_directory_from_data_path() {
        let registry = registry();
        let info = registry.create_directory("d1", None, None).await.unwrap();
        let id = info.directory_id.clone();

        registry.delete_directory(&id).await.unwrap();

        assert!(matches!(
            registry.prover(&id).unwrap_err(),
            KeydirError::DirectoryNotFound { .. }
        ));
        // Admin metadata stays visible
        assert!(registry.get_directory(&id).unwrap().is_deleted());
        assert!(registry.list_directories(false).is_empty());
        assert_eq!(registry.list_directories(true).len(), 1);
    }

    #[tokio::test]
    async fn test_undelete_restores_directory() {
        let registry = registry();
        let info = registry.create_directory("d1", None, None).await.unwrap();
        let id = info.directory_id.clone();

        registry.delete_directory(&id).await.unwrap();
        registry.undelete_directory(&id).unwrap();

        assert!(registry.prover(&id).is_ok());
        let handle = registry.handle(&id).unwrap();
        assert!(handle.sequencer_running());
    }

    #[tokio::test]
    async fn test_gc_respects_grace_period() {
        let registry = DirectoryRegistry::new(
            Arc::new(MemoryAuditLogger::new()),
            RegistryOptions::builder().gc_grace(Duration::from_secs(3600)).build(),
        );
        let info = registry.create_directory("d1", None, None).await.unwrap();
        let id = info.directory_id.clone();

        registry.delete_directory(&id).await.unwrap();

        // Within grace: not collected
        assert!(registry.garbage_collect().await.is_empty());
        assert!(registry.get_directory(&id).is_ok());
    }

    #[tokio::test]
    async fn test_gc_purges_after_grace() {
        let registry = DirectoryRegistry::new(
            Arc::new(MemoryAuditLogger::new()),
            RegistryOptions::builder().gc_grace(Duration::ZERO).build(),
        );
        let info = registry.create_directory("d1", None, None).await.unwrap();
        let id = info.directory_id.clone();

        registry.delete_directory(&id).await.unwrap();
        let purged = registry.garbage_collect().await;
        assert_eq!(purged, vec![id.clone()]);
        assert!(registry.get_directory(&id).is_err());
    }
}
