//! Sparse Merkle map backend.
//!
//! The map holds one leaf per occupied index in a virtual 2^256-leaf binary
//! tree. Writes happen in revision-sized batches: `set_leaves` at revision
//! `r` produces an immutable snapshot derived from revision `r - 1` and
//! returns the new signed map root. Reads serve leaves with compressed
//! inclusion (or absence) proofs against any retained revision.
//!
//! The in-memory engine keeps every revision: snapshots share leaf records
//! through `Arc`, so a revision costs one cloned index map plus the touched
//! leaves.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use lattica_keydir_types::error::{InternalSnafu, Result};
use lattica_keydir_types::hash::Hash;
use lattica_keydir_types::sparse::{self, MapInclusionProof};
use lattica_keydir_types::types::{
    DirectoryId, Index, MapLeafInclusion, SignedMapRoot,
};
use lattica_keydir_types::KeydirError;
use snafu::ensure;

use crate::signer::Ed25519Signer;

/// One staged leaf write.
#[derive(Debug, Clone)]
pub struct MapLeafUpdate {
    /// Slot to write.
    pub index: Index,
    /// New leaf value (canonical `SignedEntry` bytes).
    pub leaf: Vec<u8>,
    /// Unauthenticated sidecar stored with the leaf (serialized commitment
    /// opening).
    pub extra_data: Option<Vec<u8>>,
}

/// The sparse Merkle map seam consumed by the sequencer and prover.
#[async_trait]
pub trait MapBackend: Send + Sync {
    /// Writes a batch of leaves as revision `revision` and returns the new
    /// signed map root.
    ///
    /// `revision` must be exactly one past the latest stored revision; the
    /// revision number is the write fence that makes retries safe.
    async fn set_leaves(
        &self,
        directory_id: &DirectoryId,
        revision: u64,
        updates: Vec<MapLeafUpdate>,
        highest_fully_completed_seq: u64,
    ) -> Result<SignedMapRoot>;

    /// Reads leaves (with inclusion proofs) at `revision`.
    async fn get_leaves(
        &self,
        directory_id: &DirectoryId,
        revision: u64,
        indexes: &[Index],
    ) -> Result<Vec<MapLeafInclusion>>;

    /// The signed root at `revision`.
    async fn root_at(&self, directory_id: &DirectoryId, revision: u64) -> Result<SignedMapRoot>;

    /// The latest signed root.
    async fn latest_root(&self, directory_id: &DirectoryId) -> Result<SignedMapRoot>;
}

struct LeafRecord {
    leaf: Vec<u8>,
    extra_data: Option<Vec<u8>>,
}

type LeafMap = BTreeMap<Index, Arc<LeafRecord>>;

struct MapRevision {
    leaves: Arc<LeafMap>,
    root: SignedMapRoot,
}

struct DirectoryMap {
    signer: Ed25519Signer,
    revisions: Vec<MapRevision>,
}

impl DirectoryMap {
    fn sign_root(&self, revision: u64, root_hash: Hash, hwm: u64) -> SignedMapRoot {
        let timestamp = Utc::now();
        let signing_bytes = SignedMapRoot::signing_bytes(revision, &root_hash, hwm, timestamp);
        SignedMapRoot {
            revision,
            root_hash,
            highest_fully_completed_seq: hwm,
            timestamp,
            signature: self.signer.sign(&signing_bytes),
        }
    }
}

/// In-memory reference map engine.
#[derive(Default)]
pub struct InMemoryMapBackend {
    directories: DashMap<DirectoryId, DirectoryMap>,
}

impl InMemoryMapBackend {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Provisions storage for a directory and writes the empty revision 0.
    ///
    /// Returns the revision-0 root so the caller can anchor it in the log.
    pub fn provision(&self, directory_id: &DirectoryId, signer: Ed25519Signer) -> SignedMapRoot {
        let mut dir = DirectoryMap { signer, revisions: Vec::new() };
        let root = dir.sign_root(0, sparse::empty_root(), 0);
        dir.revisions.push(MapRevision { leaves: Arc::new(BTreeMap::new()), root: root.clone() });
        self.directories.insert(directory_id.clone(), dir);
        root
    }

    /// Destroys all state for a directory.
    pub fn remove(&self, directory_id: &DirectoryId) {
        self.directories.remove(directory_id);
    }
}

#[async_trait]
impl MapBackend for InMemoryMapBackend {
    async fn set_leaves(
        &self,
        directory_id: &DirectoryId,
        revision: u64,
        updates: Vec<MapLeafUpdate>,
        highest_fully_completed_seq: u64,
    ) -> Result<SignedMapRoot> {
        let mut dir = self.directories.get_mut(directory_id).ok_or_else(|| {
            KeydirError::DirectoryNotFound { directory_id: directory_id.clone() }
        })?;

        let next = dir.revisions.len() as u64;
        ensure!(
            revision == next,
            InternalSnafu {
                message: format!("map write fence: expected revision {next}, got {revision}"),
            }
        );
        let prev_hwm = dir
            .revisions
            .last()
            .map(|r| r.root.highest_fully_completed_seq)
            .unwrap_or(0);
        ensure!(
            highest_fully_completed_seq >= prev_hwm,
            InternalSnafu {
                message: format!(
                    "highest_fully_completed_seq regressed: {prev_hwm} -> \
                     {highest_fully_completed_seq}"
                ),
            }
        );

        let mut leaves: LeafMap =
            dir.revisions.last().map(|r| (*r.leaves).clone()).unwrap_or_default();
        for update in updates {
            leaves.insert(
                update.index,
                Arc::new(LeafRecord { leaf: update.leaf, extra_data: update.extra_data }),
            );
        }

        let entries: Vec<(&Index, &Arc<LeafRecord>)> = leaves.iter().collect();
        let root_hash = subtree_hash(&entries, 0);
        let root = dir.sign_root(revision, root_hash, highest_fully_completed_seq);

        dir.revisions.push(MapRevision { leaves: Arc::new(leaves), root: root.clone() });
        Ok(root)
    }

    async fn get_leaves(
        &self,
        directory_id: &DirectoryId,
        revision: u64,
        indexes: &[Index],
    ) -> Result<Vec<MapLeafInclusion>> {
        let dir = self.directories.get(directory_id).ok_or_else(|| {
            KeydirError::DirectoryNotFound { directory_id: directory_id.clone() }
        })?;
        let stored = revision_at(&dir, revision)?;

        let entries: Vec<(&Index, &Arc<LeafRecord>)> = stored.leaves.iter().collect();
        let mut result = Vec::with_capacity(indexes.len());
        for index in indexes {
            let record = stored.leaves.get(index);
            let inclusion = prove_path(&entries, index);
            result.push(MapLeafInclusion {
                leaf: record.map(|r| r.leaf.clone()),
                extra_data: record.and_then(|r| r.extra_data.clone()),
                inclusion,
            });
        }
        Ok(result)
    }

    async fn root_at(&self, directory_id: &DirectoryId, revision: u64) -> Result<SignedMapRoot> {
        let dir = self.directories.get(directory_id).ok_or_else(|| {
            KeydirError::DirectoryNotFound { directory_id: directory_id.clone() }
        })?;
        Ok(revision_at(&dir, revision)?.root.clone())
    }

    async fn latest_root(&self, directory_id: &DirectoryId) -> Result<SignedMapRoot> {
        let dir = self.directories.get(directory_id).ok_or_else(|| {
            KeydirError::DirectoryNotFound { directory_id: directory_id.clone() }
        })?;
        dir.revisions
            .last()
            .map(|r| r.root.clone())
            .ok_or_else(|| KeydirError::not_found("map has no revisions"))
    }
}

fn revision_at<'a>(dir: &'a DirectoryMap, revision: u64) -> Result<&'a MapRevision> {
    let latest = dir.revisions.len().saturating_sub(1) as u64;
    dir.revisions
        .get(revision as usize)
        .ok_or(KeydirError::OutOfRange { requested: revision, latest })
}

/// Hashes the subtree at `depth` spanned by `entries`.
///
/// `entries` must be sorted by index and all share their first `depth`
/// bits.
fn subtree_hash(entries: &[(&Index, &Arc<LeafRecord>)], depth: usize) -> Hash {
    if entries.is_empty() {
        return sparse::empty_at(depth);
    }
    if depth == Index::BITS {
        debug_assert_eq!(entries.len(), 1);
        let (index, record) = entries[0];
        return sparse::leaf_hash(index, &record.leaf);
    }

    let split = entries.partition_point(|(index, _)| !index.bit(depth));
    let left = subtree_hash(&entries[..split], depth + 1);
    let right = subtree_hash(&entries[split..], depth + 1);
    sparse::node_hash(&left, &right)
}

/// Builds the compressed sibling path for `index`.
fn prove_path(entries: &[(&Index, &Arc<LeafRecord>)], index: &Index) -> MapInclusionProof {
    let mut full_path = vec![[0u8; 32]; Index::BITS];
    let mut span = entries;
    for (depth, slot) in full_path.iter_mut().enumerate() {
        let split = span.partition_point(|(i, _)| !i.bit(depth));
        let (path_side, sibling_side) =
            if index.bit(depth) { (&span[split..], &span[..split]) } else {
                (&span[..split], &span[split..])
            };
        *slot = subtree_hash(sibling_side, depth + 1);
        span = path_side;
    }
    MapInclusionProof::compress(&full_path)
}
