//! Sparse Merkle map hashing rules and inclusion proofs.
//!
//! The map is a binary Merkle tree over the full 2^256 index space. Empty
//! subtrees are never materialized: the hash of an empty subtree at any
//! depth is a precomputed constant, so a proof only carries the siblings
//! that differ from those constants.
//!
//! Hashing discipline (domain-separated):
//! - leaf:  `SHA-256(0x00 || index || value)`
//! - node:  `SHA-256(0x01 || left || right)`
//! - empty leaf: `SHA-256(0x02)`
//!
//! A leaf hash binds the index so a leaf cannot be relocated to another
//! slot without changing the root.

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::hash::Hash;
use crate::types::Index;

/// Domain separator for leaf hashes.
const LEAF_TAG: u8 = 0x00;
/// Domain separator for interior node hashes.
const NODE_TAG: u8 = 0x01;
/// Domain separator for the empty-leaf constant.
const EMPTY_TAG: u8 = 0x02;

/// `EMPTY_AT[d]` is the hash of an empty subtree rooted at depth `d`.
///
/// `EMPTY_AT[256]` is the empty-leaf constant; `EMPTY_AT[0]` is the root of
/// a completely empty map.
static EMPTY_AT: LazyLock<[Hash; Index::BITS + 1]> = LazyLock::new(|| {
    let mut table = [[0u8; 32]; Index::BITS + 1];
    table[Index::BITS] = {
        let mut hasher = Sha256::new();
        hasher.update([EMPTY_TAG]);
        hasher.finalize().into()
    };
    for depth in (0..Index::BITS).rev() {
        table[depth] = node_hash(&table[depth + 1], &table[depth + 1]);
    }
    table
});

/// Hash of an empty subtree rooted at `depth` (0 = root, 256 = leaf).
#[inline]
pub fn empty_at(depth: usize) -> Hash {
    EMPTY_AT[depth]
}

/// Root hash of a completely empty map.
pub fn empty_root() -> Hash {
    empty_at(0)
}

/// Hashes an occupied leaf.
pub fn leaf_hash(index: &Index, value: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_TAG]);
    hasher.update(index.as_bytes());
    hasher.update(value);
    hasher.finalize().into()
}

/// Hashes an interior node.
pub fn node_hash(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([NODE_TAG]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Inclusion (or absence) proof for one map slot.
///
/// The full sibling path has [`Index::BITS`] entries, almost all of which
/// are empty-subtree constants. The proof stores only the non-empty
/// siblings plus a presence bitmask: bit `d` (MSB-first, same convention as
/// [`Index::bit`]) is set when the sibling consumed at depth `d` is carried
/// explicitly. Explicit siblings are ordered deepest-first (depth 255 down
/// to 0), matching verification order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapInclusionProof {
    /// Presence bitmask over the 256 sibling positions.
    pub presence: [u8; 32],
    /// The non-empty siblings, deepest-first.
    pub siblings: Vec<Hash>,
}

impl MapInclusionProof {
    /// Compresses a full sibling path (indexed by depth 0..256, where entry
    /// `d` is the sibling of the path node below depth `d`) into a proof.
    pub fn compress(full_path: &[Hash]) -> Self {
        debug_assert_eq!(full_path.len(), Index::BITS);

        let mut presence = [0u8; 32];
        let mut siblings = Vec::new();
        // Deepest-first so verification can consume in walk order
        for depth in (0..Index::BITS).rev() {
            if full_path[depth] != empty_at(depth + 1) {
                presence[depth / 8] |= 1 << (7 - (depth % 8));
                siblings.push(full_path[depth]);
            }
        }
        Self { presence, siblings }
    }

    /// Whether the sibling at `depth` is carried explicitly.
    #[inline]
    fn has_sibling(&self, depth: usize) -> bool {
        (self.presence[depth / 8] >> (7 - (depth % 8))) & 1 == 1
    }

    /// Verifies this proof against `root` for the slot at `index`.
    ///
    /// `leaf` is the leaf value for an inclusion proof, or `None` to prove
    /// the slot empty (absence proof).
    pub fn verify(&self, root: &Hash, index: &Index, leaf: Option<&[u8]>) -> bool {
        let mut acc = match leaf {
            Some(value) => leaf_hash(index, value),
            None => empty_at(Index::BITS),
        };

        let mut explicit = self.siblings.iter();
        for depth in (0..Index::BITS).rev() {
            let sibling = if self.has_sibling(depth) {
                match explicit.next() {
                    Some(hash) => *hash,
                    // Bitmask claims more siblings than were carried
                    None => return false,
                }
            } else {
                empty_at(depth + 1)
            };

            acc = if index.bit(depth) {
                node_hash(&sibling, &acc)
            } else {
                node_hash(&acc, &sibling)
            };
        }

        // Trailing unconsumed siblings invalidate the proof
        explicit.next().is_none() && acc == *root
    }
}
