//! Core type definitions for Lattica KeyDir.
//!
//! The data model follows the verifiable map protocol:
//! - A directory is a namespace with its own VRF key, map, and log
//! - A user's entry lives at the VRF-derived index of the sparse map
//! - Every update is a signed entry chained to its predecessor by digest
//! - Every revision is a signed map root anchored in an append-only log

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::{self, CodecError};
use crate::hash::{sha256, Hash, ZERO_HASH};
use crate::keyset::{EntrySignature, KeySet};

// ============================================================================
// Identifier Types
// ============================================================================

/// Unique identifier for a directory.
///
/// URL-safe: 1-64 characters from `[A-Za-z0-9._-]`. Validated at admin
/// create time; elsewhere the id is treated as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DirectoryId(String);

impl DirectoryId {
    /// Maximum identifier length in characters.
    pub const MAX_LENGTH: usize = 64;

    /// Creates a directory id without validation.
    ///
    /// Use [`DirectoryId::parse`] on external input.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Validates and creates a directory id from external input.
    ///
    /// Returns `None` if the id is empty, too long, or contains characters
    /// outside `[A-Za-z0-9._-]`.
    pub fn parse(id: &str) -> Option<Self> {
        let valid_len = !id.is_empty() && id.len() <= Self::MAX_LENGTH;
        let valid_chars =
            id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        (valid_len && valid_chars).then(|| Self(id.to_string()))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DirectoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque user identifier supplied by the application.
///
/// The directory never interprets these bytes except to feed them to the
/// VRF.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Vec<u8>);

impl UserId {
    /// Wraps raw user identifier bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Hex, truncated: user ids are opaque bytes and may be long
        let encoded = hex::encode(&self.0);
        if encoded.len() <= 16 {
            write!(f, "{encoded}")
        } else {
            write!(f, "{}..", &encoded[..16])
        }
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

/// A 256-bit map index derived from `(directory_id, user_id)` by the VRF.
///
/// The index is the leaf position in the sparse Merkle map. Bit `i`
/// (MSB-first) selects the branch taken at depth `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Index([u8; 32]);

impl Index {
    /// Depth of the sparse map: one level per index bit.
    pub const BITS: usize = 256;

    /// Wraps raw index bytes.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns bit `depth` of the index, MSB-first.
    ///
    /// `false` selects the left branch, `true` the right.
    #[inline]
    pub fn bit(&self, depth: usize) -> bool {
        debug_assert!(depth < Self::BITS);
        let byte = self.0[depth / 8];
        (byte >> (7 - (depth % 8))) & 1 == 1
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..", &hex::encode(self.0)[..16])
    }
}

/// Assembles the VRF input for `(directory_id, user_id)`.
///
/// The directory id is length-prefixed so that `(d, u)` pairs cannot
/// collide across the concatenation boundary.
pub fn vrf_input(directory_id: &DirectoryId, user_id: &UserId) -> Vec<u8> {
    let id_bytes = directory_id.as_str().as_bytes();
    let mut input = Vec::with_capacity(4 + id_bytes.len() + user_id.as_bytes().len());
    input.extend_from_slice(&(id_bytes.len() as u32).to_le_bytes());
    input.extend_from_slice(id_bytes);
    input.extend_from_slice(user_id.as_bytes());
    input
}

// ============================================================================
// Entries and Mutations
// ============================================================================

/// The content of a user's map leaf at some revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Map slot this entry is stored at. Must equal the VRF index of the
    /// user this entry belongs to.
    pub index: Index,
    /// `HMAC-SHA512/256(nonce, profile_bytes)` commitment to profile data.
    pub commitment: Hash,
    /// Keys empowered to sign the next update to this entry.
    pub authorized_keys: KeySet,
    /// SHA-256 of the canonical entry bytes this entry supersedes, or
    /// [`ZERO_HASH`] for the first entry at this index.
    pub previous: Hash,
}

impl Entry {
    /// Encodes this entry to canonical bytes (the form that is hashed and
    /// signed).
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(self)
    }

    /// Whether this is a first-ever entry (no predecessor).
    pub fn is_initial(&self) -> bool {
        self.previous == ZERO_HASH
    }
}

/// Canonical entry bytes plus the signatures authorizing them.
///
/// This is the unit stored in map leaves: the leaf value at an index is the
/// canonical encoding of the `SignedEntry` that last updated it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEntry {
    /// Canonical [`Entry`] bytes.
    pub entry: Vec<u8>,
    /// Signatures over `entry`. A valid update verifies under the previous
    /// entry's authorized keys and under the new entry's authorized keys.
    pub signatures: Vec<EntrySignature>,
}

impl SignedEntry {
    /// Builds a signed entry from an entry and its signatures.
    pub fn new(
        entry: &Entry,
        signatures: Vec<EntrySignature>,
    ) -> Result<Self, CodecError> {
        Ok(Self { entry: entry.canonical_bytes()?, signatures })
    }

    /// Decodes the inner entry.
    pub fn parse_entry(&self) -> Result<Entry, CodecError> {
        codec::decode(&self.entry)
    }

    /// SHA-256 of the canonical entry bytes.
    ///
    /// This is the digest a successor entry must carry in `previous`.
    pub fn entry_digest(&self) -> Hash {
        sha256(&self.entry)
    }

    /// Encodes the whole signed entry to canonical bytes (the map leaf
    /// value).
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(self)
    }

    /// Decodes a signed entry from map leaf bytes.
    pub fn from_leaf_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        codec::decode(bytes)
    }
}

/// Opens an entry's commitment: the nonce and the committed profile data.
///
/// Stored alongside the leaf but not part of the authenticated leaf value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Committed {
    /// 16-byte commitment nonce.
    pub key: crate::commitment::CommitmentNonce,
    /// The committed profile bytes.
    pub data: Vec<u8>,
}

/// A client-submitted update to one user's entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryUpdate {
    /// The user whose entry is being updated.
    pub user_id: UserId,
    /// The new signed entry.
    pub mutation: SignedEntry,
    /// Optional commitment opening, verified at validation time and stored
    /// alongside the leaf when present.
    pub committed: Option<Committed>,
}

/// An update queued for sequencing, tagged with its sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedUpdate {
    /// Strictly increasing per-directory sequence number (first is 1).
    pub seq: u64,
    /// The queued update.
    pub update: EntryUpdate,
}

// ============================================================================
// Roots and Proof Objects
// ============================================================================

/// Signed root of the sparse Merkle map at one revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMapRoot {
    /// Revision number (equals this root's index in the log).
    pub revision: u64,
    /// Root hash of the sparse map at this revision.
    pub root_hash: Hash,
    /// Queue sequence number up to which mutations are incorporated.
    /// Non-decreasing across revisions.
    pub highest_fully_completed_seq: u64,
    /// When this revision was built.
    pub timestamp: DateTime<Utc>,
    /// Ed25519 signature over [`SignedMapRoot::signing_bytes`].
    pub signature: Vec<u8>,
}

impl SignedMapRoot {
    /// Fixed-width byte encoding that the map root signature covers.
    ///
    /// Layout (60 bytes):
    /// - revision: u64 BE
    /// - root_hash: 32 bytes
    /// - highest_fully_completed_seq: u64 BE
    /// - timestamp_secs: i64 BE
    /// - timestamp_nanos: u32 BE
    pub fn signing_bytes(
        revision: u64,
        root_hash: &Hash,
        highest_fully_completed_seq: u64,
        timestamp: DateTime<Utc>,
    ) -> [u8; 60] {
        let mut buf = [0u8; 60];
        buf[0..8].copy_from_slice(&revision.to_be_bytes());
        buf[8..40].copy_from_slice(root_hash);
        buf[40..48].copy_from_slice(&highest_fully_completed_seq.to_be_bytes());
        buf[48..56].copy_from_slice(&timestamp.timestamp().to_be_bytes());
        buf[56..60].copy_from_slice(&timestamp.timestamp_subsec_nanos().to_be_bytes());
        buf
    }

    /// The signed byte form of this root.
    pub fn to_signing_bytes(&self) -> [u8; 60] {
        Self::signing_bytes(
            self.revision,
            &self.root_hash,
            self.highest_fully_completed_seq,
            self.timestamp,
        )
    }
}

/// Signed root of the append-only log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedLogRoot {
    /// Number of leaves in the log.
    pub tree_size: u64,
    /// RFC 6962 Merkle tree hash over the leaves.
    pub root_hash: Hash,
    /// When this root was produced.
    pub timestamp: DateTime<Utc>,
    /// Ed25519 signature over [`SignedLogRoot::signing_bytes`].
    pub signature: Vec<u8>,
}

impl SignedLogRoot {
    /// Fixed-width byte encoding that the log root signature covers.
    ///
    /// Layout (52 bytes): tree_size u64 BE, root_hash 32 bytes,
    /// timestamp_secs i64 BE, timestamp_nanos u32 BE.
    pub fn signing_bytes(tree_size: u64, root_hash: &Hash, timestamp: DateTime<Utc>) -> [u8; 52] {
        let mut buf = [0u8; 52];
        buf[0..8].copy_from_slice(&tree_size.to_be_bytes());
        buf[8..40].copy_from_slice(root_hash);
        buf[40..48].copy_from_slice(&timestamp.timestamp().to_be_bytes());
        buf[48..52].copy_from_slice(&timestamp.timestamp_subsec_nanos().to_be_bytes());
        buf
    }

    /// The signed byte form of this root.
    pub fn to_signing_bytes(&self) -> [u8; 52] {
        Self::signing_bytes(self.tree_size, &self.root_hash, self.timestamp)
    }
}

/// A map leaf with its inclusion proof, as read from the map backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapLeafInclusion {
    /// The leaf value (canonical [`SignedEntry`] bytes), or `None` for an
    /// empty slot.
    pub leaf: Option<Vec<u8>>,
    /// Unauthenticated sidecar data stored with the leaf (the serialized
    /// [`Committed`] opening, when the client supplied one).
    pub extra_data: Option<Vec<u8>>,
    /// Inclusion (or absence) proof against the map root.
    pub inclusion: crate::sparse::MapInclusionProof,
}

/// A mutation applied at some revision, with the pre-image leaf it was
/// applied to.
///
/// `ListMutations(r)` returns these; re-applying each mutation to its
/// pre-image leaf reproduces the map root at `r` from the root at `r - 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationProof {
    /// Queue sequence number of this mutation.
    pub seq: u64,
    /// The applied signed entry.
    pub mutation: SignedEntry,
    /// The leaf this mutation superseded, proven against revision `r - 1`.
    pub prev_leaf: MapLeafInclusion,
}

// ============================================================================
// Directory Metadata
// ============================================================================

/// Admin-level metadata for a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    /// Unique directory identifier.
    pub directory_id: DirectoryId,
    /// Serialized VRF public key (clients verify index proofs with this).
    pub vrf_public_key: Vec<u8>,
    /// Ed25519 public key that signs map roots.
    pub map_public_key: Vec<u8>,
    /// Ed25519 public key that signs log roots.
    pub log_public_key: Vec<u8>,
    /// Minimum wall time between successive revisions.
    #[serde(with = "crate::config::duration_serde")]
    pub min_interval: Duration,
    /// Maximum wall time between successive revisions.
    #[serde(with = "crate::config::duration_serde")]
    pub max_interval: Duration,
    /// Whether the sequencer anchors empty revisions once `max_interval`
    /// lapses with no queued mutations.
    pub publish_empty_revisions: bool,
    /// When the directory was created.
    pub created_at: DateTime<Utc>,
    /// Soft-delete timestamp. A deleted directory rejects reads and writes
    /// but retains state until garbage collection.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Directory {
    /// Whether the directory is soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
