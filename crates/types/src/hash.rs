//! Cryptographic hashing for Lattica KeyDir.
//!
//! All digests are SHA-256. This module provides:
//! - Basic SHA-256 hashing and concatenated hashing
//! - The canonical entry digest that links an entry to its predecessor
//! - Constant-time digest comparison

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// SHA-256 hash output (32 bytes).
pub type Hash = [u8; 32];

/// Zero hash: 32 zero bytes.
///
/// Used ONLY as the `previous` digest of the first-ever entry at an index.
/// Distinct from any SHA-256 output of actual entry bytes.
pub const ZERO_HASH: Hash = [0u8; 32];

/// Compute SHA-256 hash of arbitrary data.
#[inline]
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute SHA-256 hash by concatenating multiple hash inputs.
///
/// Used for Merkle interior nodes: SHA-256(left || right).
pub fn sha256_concat(hashes: &[Hash]) -> Hash {
    let mut hasher = Sha256::new();
    for h in hashes {
        hasher.update(h);
    }
    hasher.finalize().into()
}

/// Constant-time hash comparison.
///
/// Use this for all security-critical digest comparisons (commitments,
/// `previous` links) to avoid leaking match prefixes through timing.
#[inline]
pub fn hash_eq(a: &Hash, b: &Hash) -> bool {
    a.ct_eq(b).into()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_hash_is_all_zeros() {
        assert_eq!(ZERO_HASH, [0u8; 32]);
    }

    #[test]
    fn test_sha256_basic() {
        // SHA-256("hello")
        let hash = sha256(b"hello");
        assert_eq!(
            hex::encode(hash),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_sha256_concat_matches_manual_concat() {
        let h1 = sha256(b"a");
        let h2 = sha256(b"b");
        let combined = sha256_concat(&[h1, h2]);

        let mut expected_input = Vec::new();
        expected_input.extend_from_slice(&h1);
        expected_input.extend_from_slice(&h2);
        assert_eq!(combined, sha256(&expected_input));
    }

    #[test]
    fn test_hash_eq() {
        let a = sha256(b"test");
        let b = sha256(b"test");
        let c = sha256(b"other");

        assert!(hash_eq(&a, &b));
        assert!(!hash_eq(&a, &c));
    }
}
