//! Profile commitments.
//!
//! An entry does not carry profile data directly; it carries
//! `commitment = HMAC-SHA512/256(nonce, profile_bytes)` with a 16-byte nonce
//! sampled fresh per commitment. The `(nonce, data)` pair is stored alongside
//! the leaf and returned to readers who may open the commitment; observers
//! who only see the map leaf learn nothing about the profile.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha512_256;

use crate::hash::Hash;

type HmacSha512_256 = Hmac<Sha512_256>;

/// Length of a commitment nonce in bytes.
pub const NONCE_LENGTH: usize = 16;

/// Commitment nonce.
pub type CommitmentNonce = [u8; NONCE_LENGTH];

/// Computes `HMAC-SHA512/256(nonce, data)`.
#[allow(clippy::expect_used)] // HMAC accepts any key length
pub fn commit(nonce: &CommitmentNonce, data: &[u8]) -> Hash {
    let mut mac =
        HmacSha512_256::new_from_slice(nonce).expect("HMAC accepts any key length");
    mac.update(data);
    let out = mac.finalize().into_bytes();

    let mut hash = [0u8; 32];
    hash.copy_from_slice(&out);
    hash
}

/// Verifies that `(nonce, data)` opens `commitment`.
///
/// Comparison is constant-time.
pub fn verify(nonce: &CommitmentNonce, data: &[u8], commitment: &Hash) -> bool {
    crate::hash::hash_eq(&commit(nonce, data), commitment)
}

/// Samples a fresh commitment nonce.
///
/// Nonces MUST NOT be reused across commitments; a reused nonce lets an
/// observer correlate identical profiles.
pub fn sample_nonce() -> CommitmentNonce {
    let mut nonce = [0u8; NONCE_LENGTH];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_roundtrip() {
        let nonce = sample_nonce();
        let commitment = commit(&nonce, b"profile data");

        assert!(verify(&nonce, b"profile data", &commitment));
    }

    #[test]
    fn test_commit_wrong_data_fails() {
        let nonce = sample_nonce();
        let commitment = commit(&nonce, b"profile data");

        assert!(!verify(&nonce, b"other data", &commitment));
    }

    #[test]
    fn test_commit_wrong_nonce_fails() {
        let nonce = sample_nonce();
        let commitment = commit(&nonce, b"profile data");

        let other = sample_nonce();
        assert_ne!(nonce, other);
        assert!(!verify(&other, b"profile data", &commitment));
    }

    #[test]
    fn test_commit_is_deterministic() {
        let nonce = [7u8; NONCE_LENGTH];
        assert_eq!(commit(&nonce, b"data"), commit(&nonce, b"data"));
    }

    #[test]
    fn test_distinct_nonces_hide_equal_data() {
        let a = commit(&[1u8; NONCE_LENGTH], b"same profile");
        let b = commit(&[2u8; NONCE_LENGTH], b"same profile");
        assert_ne!(a, b);
    }
}
