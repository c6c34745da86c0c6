//! Append-only log proofs (RFC 6962 / RFC 9162 Merkle tree).
//!
//! The log anchors one map root per revision. Verifiers use inclusion
//! proofs to check that a map root sits at log index `revision`, and
//! consistency proofs to check that the log seen today is an append-only
//! extension of the log they verified earlier.
//!
//! Hashing discipline:
//! - leaf:  `SHA-256(0x00 || leaf_bytes)`
//! - node:  `SHA-256(0x01 || left || right)`
//! - empty log root: `SHA-256("")`

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::hash::Hash;

/// Root hash of an empty log.
pub fn empty_log_root() -> Hash {
    Sha256::digest([]).into()
}

/// Hashes a log leaf.
pub fn log_leaf_hash(leaf_bytes: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([0x00]);
    hasher.update(leaf_bytes);
    hasher.finalize().into()
}

/// Hashes an interior log node.
pub fn log_node_hash(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([0x01]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Proof that a leaf is included at `leaf_index` in a log of `tree_size`
/// leaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogInclusionProof {
    /// Position of the leaf in the log.
    pub leaf_index: u64,
    /// Size of the tree the proof was generated against.
    pub tree_size: u64,
    /// Audit path, leaf to root.
    pub hashes: Vec<Hash>,
}

impl LogInclusionProof {
    /// Verifies this proof for `leaf_hash` against `root_hash`.
    ///
    /// Implements the RFC 9162 §2.1.3.2 verification algorithm.
    pub fn verify(&self, leaf_hash: &Hash, root_hash: &Hash) -> bool {
        if self.leaf_index >= self.tree_size {
            return false;
        }

        let mut fnode = self.leaf_index;
        let mut snode = self.tree_size - 1;
        let mut acc = *leaf_hash;

        for p in &self.hashes {
            if snode == 0 {
                return false;
            }
            if fnode & 1 == 1 || fnode == snode {
                acc = log_node_hash(p, &acc);
                if fnode & 1 == 0 {
                    while fnode & 1 == 0 && fnode != 0 {
                        fnode >>= 1;
                        snode >>= 1;
                    }
                }
            } else {
                acc = log_node_hash(&acc, p);
            }
            fnode >>= 1;
            snode >>= 1;
        }

        snode == 0 && acc == *root_hash
    }
}

/// Proof that the log at `to_size` is an append-only extension of the log
/// at `from_size`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConsistencyProof {
    /// The earlier (client-verified) tree size.
    pub from_size: u64,
    /// The later tree size.
    pub to_size: u64,
    /// Consistency path.
    pub hashes: Vec<Hash>,
}

impl LogConsistencyProof {
    /// Verifies this proof between `from_root` and `to_root`.
    ///
    /// Implements the RFC 9162 §2.1.4.2 verification algorithm. A proof
    /// from size 0 (nothing verified yet) or between equal sizes with
    /// matching roots is vacuously valid with an empty path.
    pub fn verify(&self, from_root: &Hash, to_root: &Hash) -> bool {
        if self.from_size > self.to_size {
            return false;
        }
        if self.from_size == self.to_size {
            return self.hashes.is_empty() && from_root == to_root;
        }
        if self.from_size == 0 {
            // Nothing to be consistent with
            return self.hashes.is_empty();
        }

        let mut path = self.hashes.iter();

        // An exact power-of-two from_size is itself a node of the new tree;
        // the path implicitly starts from the old root.
        let first = if self.from_size.is_power_of_two() {
            *from_root
        } else {
            match path.next() {
                Some(hash) => *hash,
                None => return false,
            }
        };

        let mut fnode = self.from_size - 1;
        let mut snode = self.to_size - 1;
        while fnode & 1 == 1 {
            fnode >>= 1;
            snode >>= 1;
        }

        let mut fr = first;
        let mut sr = first;

        for c in path {
            if snode == 0 {
                return false;
            }
            if fnode & 1 == 1 || fnode == snode {
                fr = log_node_hash(c, &fr);
                sr = log_node_hash(c, &sr);
                if fnode & 1 == 0 {
                    while fnode & 1 == 0 && fnode != 0 {
                        fnode >>= 1;
                        snode >>= 1;
                    }
                }
            } else {
                sr = log_node_hash(&sr, c);
            }
            fnode >>= 1;
            snode >>= 1;
        }

        snode == 0 && fr == *from_root && sr == *to_root
    }
}

/// Computes the RFC 6962 Merkle tree hash of a list of leaf hashes.
///
/// Splits at the largest power of two strictly less than the leaf count.
pub fn merkle_tree_hash(leaf_hashes: &[Hash]) -> Hash {
    match leaf_hashes.len() {
        0 => empty_log_root(),
        1 => leaf_hashes[0],
        n => {
            let k = largest_power_of_two_below(n);
            let left = merkle_tree_hash(&leaf_hashes[..k]);
            let right = merkle_tree_hash(&leaf_hashes[k..]);
            log_node_hash(&left, &right)
        },
    }
}

/// Computes the RFC 6962 audit path for the leaf at `index`.
pub fn inclusion_path(index: usize, leaf_hashes: &[Hash]) -> Vec<Hash> {
    let n = leaf_hashes.len();
    debug_assert!(index < n);
    if n <= 1 {
        return Vec::new();
    }

    let k = largest_power_of_two_below(n);
    if index < k {
        let mut path = inclusion_path(index, &leaf_hashes[..k]);
        path.push(merkle_tree_hash(&leaf_hashes[k..]));
        path
    } else {
        let mut path = inclusion_path(index - k, &leaf_hashes[k..]);
        path.push(merkle_tree_hash(&leaf_hashes[..k]));
        path
    }
}

/// Computes the RFC 6962 consistency path between `from_size` and the full
/// leaf list.
pub fn consistency_path(from_size: usize, leaf_hashes: &[Hash]) -> Vec<Hash> {
    if from_size == 0 || from_size >= leaf_hashes.len() {
        return Vec::new();
    }
    subproof(from_size, leaf_hashes, true)
}

fn subproof(m: usize, leaves: &[Hash], complete: bool) -> Vec<Hash> {
    let n = leaves.len();
    if m == n {
        return if complete { Vec::new() } else { vec![merkle_tree_hash(leaves)] };
    }

    let k = largest_power_of_two_below(n);
    if m <= k {
        let mut path = subproof(m, &leaves[..k], complete);
        path.push(merkle_tree_hash(&leaves[k..]));
        path
    } else {
        let mut path = subproof(m - k, &leaves[k..], false);
        path.push(merkle_tree_hash(&leaves[..k]));
        path
    }
}

/// Largest power of two strictly less than `n` (n must be ≥ 2).
fn largest_power_of_two_below(n: usize) -> usize {
    debug_assert!(n >= 2);
    let mut k = 1;
    while k * 2 < n {
        k *= 2;
    }
    k
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn leaves(n: usize) -> Vec<Hash> {
        (0..n).map(|i| log_leaf_hash(format!("leaf-{i}").as_bytes())).collect()
    }

    #[test]
    fn test_empty_root_is_sha256_of_empty() {
        assert_eq!(
            hex::encode(empty_log_root()),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_single_leaf_root_is_leaf_hash() {
        let l = leaves(1);
        assert_eq!(merkle_tree_hash(&l), l[0]);
    }

    #[test]
    fn test_two_leaf_root() {
        let l = leaves(2);
        assert_eq!(merkle_tree_hash(&l), log_node_hash(&l[0], &l[1]));
    }

    #[test]
    fn test_inclusion_all_positions_all_sizes() {
        for size in 1..=32usize {
            let l = leaves(size);
            let root = merkle_tree_hash(&l);
            for (i, leaf) in l.iter().enumerate() {
                let proof = LogInclusionProof {
                    leaf_index: i as u64,
                    tree_size: size as u64,
                    hashes: inclusion_path(i, &l),
                };
                assert!(proof.verify(leaf, &root), "size={size} index={i}");
            }
        }
    }

    #[test]
    fn test_inclusion_rejects_wrong_leaf() {
        let l = leaves(7);
        let root = merkle_tree_hash(&l);
        let proof = LogInclusionProof {
            leaf_index: 3,
            tree_size: 7,
            hashes: inclusion_path(3, &l),
        };
        assert!(!proof.verify(&l[4], &root));
        assert!(!proof.verify(&log_leaf_hash(b"forged"), &root));
    }

    #[test]
    fn test_inclusion_rejects_out_of_range() {
        let l = leaves(4);
        let root = merkle_tree_hash(&l);
        let proof =
            LogInclusionProof { leaf_index: 4, tree_size: 4, hashes: inclusion_path(3, &l) };
        assert!(!proof.verify(&l[3], &root));
    }

    #[test]
    fn test_consistency_all_size_pairs() {
        for to in 1..=24usize {
            let l = leaves(to);
            let to_root = merkle_tree_hash(&l);
            for from in 1..=to {
                let from_root = merkle_tree_hash(&l[..from]);
                let proof = LogConsistencyProof {
                    from_size: from as u64,
                    to_size: to as u64,
                    hashes: consistency_path(from, &l),
                };
                assert!(proof.verify(&from_root, &to_root), "from={from} to={to}");
            }
        }
    }

    #[test]
    fn test_consistency_rejects_forked_history() {
        let l = leaves(8);
        let mut forked = l.clone();
        forked[2] = log_leaf_hash(b"rewritten");

        let from_root = merkle_tree_hash(&l[..5]);
        let to_root = merkle_tree_hash(&forked);
        let proof = LogConsistencyProof {
            from_size: 5,
            to_size: 8,
            hashes: consistency_path(5, &forked),
        };
        assert!(!proof.verify(&from_root, &to_root));
    }

    #[test]
    fn test_consistency_from_zero_is_vacuous() {
        let l = leaves(3);
        let proof = LogConsistencyProof { from_size: 0, to_size: 3, hashes: vec![] };
        assert!(proof.verify(&empty_log_root(), &merkle_tree_hash(&l)));
    }

    #[test]
    fn test_consistency_equal_sizes_requires_equal_roots() {
        let l = leaves(5);
        let root = merkle_tree_hash(&l);
        let proof = LogConsistencyProof { from_size: 5, to_size: 5, hashes: vec![] };
        assert!(proof.verify(&root, &root));
        assert!(!proof.verify(&root, &empty_log_root()));
    }
}
