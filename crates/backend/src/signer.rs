//! Root-signing capability.
//!
//! Map roots and log roots are signed with Ed25519. The signer is held as
//! an opaque handle exposing only `sign`, `verify`, and `public_key`; key
//! material enters and leaves through seed bytes for the admin key-carrier
//! surface.

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier, VerifyingKey};
use rand::{CryptoRng, RngCore};

/// An Ed25519 signing capability for map and log roots.
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    /// Generates a fresh signer.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self { key: SigningKey::generate(rng) }
    }

    /// Reconstructs a signer from exported seed bytes.
    pub fn from_seed_bytes(seed: &[u8]) -> Option<Self> {
        let seed: [u8; 32] = seed.try_into().ok()?;
        Some(Self { key: SigningKey::from_bytes(&seed) })
    }

    /// Exports the seed for key carriers.
    pub fn to_seed_bytes(&self) -> [u8; 32] {
        self.key.to_bytes()
    }

    /// The verifying key bytes clients check root signatures against.
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }

    /// Signs `message`, returning the 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signature: Signature = self.key.sign(message);
        signature.to_bytes().to_vec()
    }
}

/// Verifies an Ed25519 root signature.
///
/// Malformed keys or signatures verify as false.
pub fn verify_root_signature(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(key_bytes) = <[u8; 32]>::try_from(public_key) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(message, &sig).is_ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let signer = Ed25519Signer::generate(&mut OsRng);
        let sig = signer.sign(b"map root bytes");

        assert!(verify_root_signature(&signer.public_key_bytes(), b"map root bytes", &sig));
        assert!(!verify_root_signature(&signer.public_key_bytes(), b"other bytes", &sig));
    }

    #[test]
    fn test_seed_roundtrip_preserves_identity() {
        let signer = Ed25519Signer::generate(&mut OsRng);
        let restored = Ed25519Signer::from_seed_bytes(&signer.to_seed_bytes()).unwrap();
        assert_eq!(signer.public_key_bytes(), restored.public_key_bytes());
    }

    #[test]
    fn test_bad_seed_length_rejected() {
        assert!(Ed25519Signer::from_seed_bytes(&[0u8; 16]).is_none());
    }
}
