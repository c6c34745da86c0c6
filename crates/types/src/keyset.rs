//! Authorized key sets and entry signatures.
//!
//! Every entry carries the set of public verification keys empowered to sign
//! the next update to that entry. Updates are signed with Ed25519 over the
//! canonical entry bytes; a rotation must carry a signature under the old
//! set and a signature under the new set.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::hash::sha256;

/// Signature algorithm for an authorized key.
///
/// Only Ed25519 is currently supported. The enum exists so that the wire
/// format can grow new algorithms without breaking old entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    /// Ed25519 (RFC 8032).
    Ed25519,
}

/// A single public verification key with its identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizedKey {
    /// Stable identifier for this key within the set.
    pub key_id: String,
    /// Signature algorithm this key is used with.
    pub algorithm: KeyAlgorithm,
    /// Raw public key bytes (32 bytes for Ed25519).
    pub public_key: Vec<u8>,
}

impl AuthorizedKey {
    /// Builds an Ed25519 authorized key from a verifying key.
    ///
    /// The key id is derived from the public key: the first 8 bytes of
    /// SHA-256(public_key), hex-encoded.
    pub fn ed25519(key: &VerifyingKey) -> Self {
        let digest = sha256(key.as_bytes());
        Self {
            key_id: hex::encode(&digest[..8]),
            algorithm: KeyAlgorithm::Ed25519,
            public_key: key.as_bytes().to_vec(),
        }
    }

    /// Verifies `signature` over `message` under this key.
    ///
    /// Returns false for malformed keys or signatures rather than erroring:
    /// a garbage key in a key set cannot authorize anything.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match self.algorithm {
            KeyAlgorithm::Ed25519 => {
                let Ok(key_bytes) = <[u8; 32]>::try_from(self.public_key.as_slice()) else {
                    return false;
                };
                let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
                    return false;
                };
                let Ok(sig) = Signature::from_slice(signature) else {
                    return false;
                };
                key.verify(message, &sig).is_ok()
            },
        }
    }
}

/// A set of authorized keys.
///
/// Order is not significant; key ids should be unique within a set but the
/// verifier tolerates duplicates (any matching key authorizes).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeySet {
    /// The keys in this set.
    pub keys: Vec<AuthorizedKey>,
}

impl KeySet {
    /// Builds a key set from Ed25519 verifying keys.
    pub fn from_ed25519<'a>(keys: impl IntoIterator<Item = &'a VerifyingKey>) -> Self {
        Self { keys: keys.into_iter().map(AuthorizedKey::ed25519).collect() }
    }

    /// Whether the set contains no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Number of keys in the set.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Checks whether any signature in `signatures` verifies over `message`
    /// under a key in this set.
    ///
    /// Signatures are matched to keys by `key_id` first; a signature whose
    /// `key_id` is unknown to this set is ignored.
    pub fn verify_any(&self, message: &[u8], signatures: &[EntrySignature]) -> bool {
        signatures.iter().any(|sig| {
            self.keys
                .iter()
                .filter(|key| key.key_id == sig.key_id)
                .any(|key| key.verify(message, &sig.signature))
        })
    }
}

/// A signature over canonical entry bytes, tagged with the signing key's id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySignature {
    /// Identifier of the key that produced this signature.
    pub key_id: String,
    /// Raw signature bytes (64 bytes for Ed25519).
    pub signature: Vec<u8>,
}

impl EntrySignature {
    /// Signs `message` with an Ed25519 signing key.
    ///
    /// The `key_id` is derived the same way as [`AuthorizedKey::ed25519`] so
    /// the signature matches the corresponding set member.
    pub fn sign_ed25519(key: &SigningKey, message: &[u8]) -> Self {
        let authorized = AuthorizedKey::ed25519(&key.verifying_key());
        let signature: Signature = key.sign(message);
        Self { key_id: authorized.key_id, signature: signature.to_bytes().to_vec() }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    fn keypair() -> SigningKey {
        SigningKey::generate(&mut OsRng)
    }

    #[test]
    fn test_sign_and_verify_any() {
        let sk = keypair();
        let set = KeySet::from_ed25519([&sk.verifying_key()]);

        let message = b"canonical entry bytes";
        let sig = EntrySignature::sign_ed25519(&sk, message);

        assert!(set.verify_any(message, &[sig]));
    }

    #[test]
    fn test_wrong_key_does_not_verify() {
        let sk = keypair();
        let other = keypair();
        let set = KeySet::from_ed25519([&sk.verifying_key()]);

        let message = b"canonical entry bytes";
        let sig = EntrySignature::sign_ed25519(&other, message);

        assert!(!set.verify_any(message, &[sig]));
    }

    #[test]
    fn test_tampered_message_does_not_verify() {
        let sk = keypair();
        let set = KeySet::from_ed25519([&sk.verifying_key()]);

        let sig = EntrySignature::sign_ed25519(&sk, b"original");
        assert!(!set.verify_any(b"tampered", &[sig]));
    }

    #[test]
    fn test_empty_set_rejects_everything() {
        let sk = keypair();
        let set = KeySet::default();
        let sig = EntrySignature::sign_ed25519(&sk, b"message");

        assert!(set.is_empty());
        assert!(!set.verify_any(b"message", &[sig]));
    }

    #[test]
    fn test_malformed_public_key_rejects() {
        let sk = keypair();
        let key = AuthorizedKey {
            key_id: "bogus".to_string(),
            algorithm: KeyAlgorithm::Ed25519,
            public_key: vec![0xff; 7],
        };
        let set = KeySet { keys: vec![key] };

        let mut sig = EntrySignature::sign_ed25519(&sk, b"message");
        sig.key_id = "bogus".to_string();
        assert!(!set.verify_any(b"message", &[sig]));
    }

    #[test]
    fn test_key_id_is_stable_digest_prefix() {
        let sk = keypair();
        let key = AuthorizedKey::ed25519(&sk.verifying_key());
        let digest = sha256(sk.verifying_key().as_bytes());
        assert_eq!(key.key_id, hex::encode(&digest[..8]));
    }
}
