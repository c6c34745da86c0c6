//! Shared harness for integration tests: a registry with one directory,
//! in-memory audit capture, and proof-verification helpers.

#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::sync::Arc;
use std::time::Duration;

use lattica_keydir_backend::signer::verify_root_signature;
use lattica_keydir_core::audit::MemoryAuditLogger;
use lattica_keydir_core::prover::{Prover, RevisionProofBundle};
use lattica_keydir_core::registry::{DirectoryRegistry, RegistryOptions};
use lattica_keydir_test_utils::fixtures::{fast_settings, TestUser};
use lattica_keydir_types::codec;
use lattica_keydir_types::config::DirectorySettings;
use lattica_keydir_types::logproof::log_leaf_hash;
use lattica_keydir_types::types::{vrf_input, Directory, DirectoryId, EntryUpdate, Index, SignedEntry};
use lattica_keydir_types::Result;
use lattica_keydir_vrf::VrfPublicKey;

/// One directory on a fresh registry, with audit capture.
pub struct TestDirectory {
    registry: Arc<DirectoryRegistry>,
    audit: Arc<MemoryAuditLogger>,
    info: Directory,
}

impl TestDirectory {
    /// Creates a directory with fast test settings.
    pub async fn create(id: &str) -> Self {
        Self::with_settings(id, fast_settings()).await
    }

    /// Creates a directory whose first revision waits long enough for
    /// several enqueues to land in one batch.
    pub async fn create_slow(id: &str) -> Self {
        let settings = DirectorySettings::builder()
            .min_interval(Duration::from_millis(300))
            .max_interval(Duration::from_secs(2))
            .publish_empty_revisions(true)
            .max_batch_size(64)
            .build();
        Self::with_settings(id, settings).await
    }

    /// Creates a directory that never publishes empty revisions, so
    /// revision numbers track submitted updates exactly.
    pub async fn create_no_empty(id: &str) -> Self {
        let settings = DirectorySettings::builder()
            .min_interval(Duration::from_millis(10))
            .max_interval(Duration::from_secs(3600))
            .publish_empty_revisions(false)
            .max_batch_size(64)
            .build();
        Self::with_settings(id, settings).await
    }

    async fn with_settings(id: &str, settings: DirectorySettings) -> Self {
        let audit = Arc::new(MemoryAuditLogger::new());
        let registry = Arc::new(DirectoryRegistry::new(
            Arc::clone(&audit) as Arc<dyn lattica_keydir_core::audit::AuditLogger>,
            RegistryOptions::default(),
        ));
        let info = registry.create_directory(id, Some(settings), None).await.unwrap();
        Self { registry, audit, info }
    }

    pub fn id(&self) -> &DirectoryId {
        &self.info.directory_id
    }

    pub fn info(&self) -> &Directory {
        &self.info
    }

    pub fn registry(&self) -> &DirectoryRegistry {
        &self.registry
    }

    pub fn audit(&self) -> &MemoryAuditLogger {
        &self.audit
    }

    pub fn prover(&self) -> Prover {
        self.registry.prover(self.id()).unwrap()
    }

    pub fn vrf_public_key(&self) -> VrfPublicKey {
        VrfPublicKey::from_bytes(&self.info.vrf_public_key).unwrap()
    }

    pub fn vrf_input(&self, user: &TestUser) -> Vec<u8> {
        vrf_input(self.id(), &user.user_id)
    }

    /// The VRF index for a user, via the index-only read path.
    pub fn index_of(&self, user: &TestUser) -> Index {
        self.prover().batch_get_user_indexes(std::slice::from_ref(&user.user_id))[0].index
    }

    /// Queues through the validating write path.
    pub async fn queue(&self, update: EntryUpdate) -> Result<()> {
        self.registry.queue_entry_update(self.id(), update).await
    }

    /// Injects into the queue without write-path validation, the way a
    /// racing submission lands.
    pub async fn enqueue_raw(&self, update: EntryUpdate) -> Result<u64> {
        self.registry.enqueue_raw(self.id(), update).await
    }

    /// The user's current leaf bytes at the latest published revision.
    pub async fn leaf(&self, user: &TestUser) -> Option<Vec<u8>> {
        let response = self.prover().get_user(&user.user_id, None).await.unwrap();
        response.leaf.leaf.leaf
    }

    /// Waits until the user has a published leaf and returns it.
    pub async fn wait_for_leaf(&self, user: &TestUser) -> Vec<u8> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(leaf) = self.leaf(user).await {
                return leaf;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "leaf for {} never published",
                user.user_id
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Waits until the user's leaf equals `expected`.
    pub async fn wait_leaf_eq(&self, user: &TestUser, expected: &[u8]) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if self.leaf(user).await.as_deref() == Some(expected) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// The user's current signed entry (leaf must exist).
    pub async fn current_entry(&self, user: &TestUser) -> SignedEntry {
        let leaf = self.wait_for_leaf(user).await;
        SignedEntry::from_leaf_bytes(&leaf).unwrap()
    }

    /// Total applied mutations across all published revisions.
    pub async fn total_applied_mutations(&self) -> usize {
        let latest = self.prover().latest_revision().await.unwrap();
        let mut applied = 0;
        for revision in 1..=latest {
            applied +=
                self.prover().list_mutations(revision, None, None).await.unwrap().mutations.len();
        }
        applied
    }
}

/// Verifies that the bundle's map root is anchored at log index
/// `revision` under the bundle's log root.
pub fn verify_log_anchor(bundle: &RevisionProofBundle) -> bool {
    let leaf_bytes = codec::encode(&bundle.map_root).unwrap();
    bundle.log_inclusion.leaf_index == bundle.map_root.revision
        && bundle.log_inclusion.verify(&log_leaf_hash(&leaf_bytes), &bundle.log_root.root_hash)
}

/// Verifies the map and log root signatures under the directory's
/// published keys.
pub fn verify_root_signatures(info: &Directory, bundle: &RevisionProofBundle) -> bool {
    verify_root_signature(
        &info.map_public_key,
        &bundle.map_root.to_signing_bytes(),
        &bundle.map_root.signature,
    ) && verify_root_signature(
        &info.log_public_key,
        &bundle.log_root.to_signing_bytes(),
        &bundle.log_root.signature,
    )
}
