//! Append-only log backend.
//!
//! The log anchors one signed map root per revision: the leaf at log index
//! `r` is the canonical encoding of revision `r`'s map root. Appends are
//! strictly sequential; re-appending an already-anchored root is the
//! idempotent recovery path after a crash between map write and log anchor.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use lattica_keydir_types::codec;
use lattica_keydir_types::error::{InternalSnafu, Result, SerializationSnafu};
use lattica_keydir_types::hash::Hash;
use lattica_keydir_types::logproof::{
    self, LogConsistencyProof, LogInclusionProof,
};
use lattica_keydir_types::types::{DirectoryId, SignedLogRoot, SignedMapRoot};
use lattica_keydir_types::KeydirError;
use snafu::{ensure, ResultExt};

use crate::signer::Ed25519Signer;

/// The append-only log seam consumed by the sequencer and prover.
#[async_trait]
pub trait LogBackend: Send + Sync {
    /// Appends `map_root` and returns `(log_index, new_signed_log_root)`.
    ///
    /// The assigned index always equals `map_root.revision`: an append of
    /// an already-anchored revision returns the existing position without
    /// modifying the log, and an append that would leave a gap fails.
    async fn append(
        &self,
        directory_id: &DirectoryId,
        map_root: &SignedMapRoot,
    ) -> Result<(u64, SignedLogRoot)>;

    /// Inclusion proof for the leaf at `leaf_index` against the log at
    /// `tree_size`.
    async fn inclusion_proof(
        &self,
        directory_id: &DirectoryId,
        leaf_index: u64,
        tree_size: u64,
    ) -> Result<LogInclusionProof>;

    /// Consistency proof between `from_size` and `to_size`.
    async fn consistency_proof(
        &self,
        directory_id: &DirectoryId,
        from_size: u64,
        to_size: u64,
    ) -> Result<LogConsistencyProof>;

    /// The latest signed log root.
    async fn latest_root(&self, directory_id: &DirectoryId) -> Result<SignedLogRoot>;
}

struct DirectoryLog {
    signer: Ed25519Signer,
    leaf_hashes: Vec<Hash>,
    /// Revision anchored at each leaf, for idempotent re-append checks.
    leaf_revisions: Vec<u64>,
    latest: SignedLogRoot,
}

impl DirectoryLog {
    fn sign_current(&self) -> SignedLogRoot {
        let tree_size = self.leaf_hashes.len() as u64;
        let root_hash = logproof::merkle_tree_hash(&self.leaf_hashes);
        let timestamp = Utc::now();
        let signing_bytes = SignedLogRoot::signing_bytes(tree_size, &root_hash, timestamp);
        SignedLogRoot {
            tree_size,
            root_hash,
            timestamp,
            signature: self.signer.sign(&signing_bytes),
        }
    }
}

/// In-memory reference log engine.
#[derive(Default)]
pub struct InMemoryLogBackend {
    directories: DashMap<DirectoryId, DirectoryLog>,
}

impl InMemoryLogBackend {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Provisions an empty log for a directory.
    pub fn provision(&self, directory_id: &DirectoryId, signer: Ed25519Signer) {
        let mut log = DirectoryLog {
            signer,
            leaf_hashes: Vec::new(),
            leaf_revisions: Vec::new(),
            latest: SignedLogRoot {
                tree_size: 0,
                root_hash: logproof::empty_log_root(),
                timestamp: Utc::now(),
                signature: Vec::new(),
            },
        };
        log.latest = log.sign_current();
        self.directories.insert(directory_id.clone(), log);
    }

    /// Destroys all state for a directory.
    pub fn remove(&self, directory_id: &DirectoryId) {
        self.directories.remove(directory_id);
    }
}

#[async_trait]
impl LogBackend for InMemoryLogBackend {
    async fn append(
        &self,
        directory_id: &DirectoryId,
        map_root: &SignedMapRoot,
    ) -> Result<(u64, SignedLogRoot)> {
        let mut log = self.directories.get_mut(directory_id).ok_or_else(|| {
            KeydirError::DirectoryNotFound { directory_id: directory_id.clone() }
        })?;

        let leaf_bytes = codec::encode(map_root).context(SerializationSnafu)?;
        let leaf_hash = logproof::log_leaf_hash(&leaf_bytes);
        let next = log.leaf_hashes.len() as u64;

        if map_root.revision < next {
            // Idempotent re-anchor: the leaf must match what was appended
            let at = map_root.revision as usize;
            ensure!(
                log.leaf_hashes[at] == leaf_hash && log.leaf_revisions[at] == map_root.revision,
                InternalSnafu {
                    message: format!(
                        "log anchor conflict at index {}: a different root is anchored there",
                        map_root.revision
                    ),
                }
            );
            return Ok((map_root.revision, log.latest.clone()));
        }

        ensure!(
            map_root.revision == next,
            InternalSnafu {
                message: format!(
                    "log append fence: expected revision {next}, got {}",
                    map_root.revision
                ),
            }
        );

        log.leaf_hashes.push(leaf_hash);
        log.leaf_revisions.push(map_root.revision);
        log.latest = log.sign_current();
        Ok((next, log.latest.clone()))
    }

    async fn inclusion_proof(
        &self,
        directory_id: &DirectoryId,
        leaf_index: u64,
        tree_size: u64,
    ) -> Result<LogInclusionProof> {
        let log = self.directories.get(directory_id).ok_or_else(|| {
            KeydirError::DirectoryNotFound { directory_id: directory_id.clone() }
        })?;

        let size = log.leaf_hashes.len() as u64;
        if tree_size > size {
            return Err(KeydirError::OutOfRange { requested: tree_size, latest: size });
        }
        if leaf_index >= tree_size {
            return Err(KeydirError::invalid_argument(format!(
                "leaf index {leaf_index} not below tree size {tree_size}"
            )));
        }

        Ok(LogInclusionProof {
            leaf_index,
            tree_size,
            hashes: logproof::inclusion_path(
                leaf_index as usize,
                &log.leaf_hashes[..tree_size as usize],
            ),
        })
    }

    async fn consistency_proof(
        &self,
        directory_id: &DirectoryId,
        from_size: u64,
        to_size: u64,
    ) -> Result<LogConsistencyProof> {
        let log = self.directories.get(directory_id).ok_or_else(|| {
            KeydirError::DirectoryNotFound { directory_id: directory_id.clone() }
        })?;

        let size = log.leaf_hashes.len() as u64;
        if to_size > size {
            return Err(KeydirError::OutOfRange { requested: to_size, latest: size });
        }
        if from_size > to_size {
            return Err(KeydirError::invalid_argument(format!(
                "consistency range inverted: {from_size} > {to_size}"
            )));
        }

        Ok(LogConsistencyProof {
            from_size,
            to_size,
            hashes: logproof::consistency_path(
                from_size as usize,
                &log.leaf_hashes[..to_size as usize],
            ),
        })
    }

    async fn latest_root(&self, directory_id: &DirectoryId) -> Result<SignedLogRoot> {
        let log = self.directories.get(directory_id).ok_or_else(|| {
            KeydirError::DirectoryNotFound { directory_id: directory_id.clone() }
        })?;
        Ok(log.latest.clone())
    }
}
