//! Verifiable random function for Lattica KeyDir.
//!
//! ECVRF-RISTRETTO255-SHA512 in the construction of RFC 9381: a keyed,
//! deterministic function whose 32-byte output doubles as the user's map
//! index, together with an 80-byte proof that anyone holding the public key
//! can verify. Without the private key the outputs are pseudorandom, so the
//! map index hides the user identifier from observers who do not hold a
//! proof.
//!
//! Proof layout: `gamma (32) || c (16) || s (32)`.

use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use snafu::Snafu;
use subtle::ConstantTimeEq;

use lattica_keydir_types::types::Index;

/// Domain separator for hash-to-group.
const DST_HASH_TO_GROUP: &[u8] = b"lattica-keydir-vrf/h2g";
/// Domain separator for the nonce derivation.
const DST_NONCE: &[u8] = b"lattica-keydir-vrf/nonce";
/// Domain separator for the challenge.
const DST_CHALLENGE: &[u8] = b"lattica-keydir-vrf/chal";
/// Domain separator for the proof-to-hash output.
const DST_OUTPUT: &[u8] = b"lattica-keydir-vrf/out";

/// Length of a serialized proof in bytes.
pub const PROOF_LENGTH: usize = 80;
/// Length of a serialized public key in bytes.
pub const PUBLIC_KEY_LENGTH: usize = 32;
/// Length of a private key seed in bytes.
pub const SECRET_KEY_LENGTH: usize = 32;
/// Length of the challenge scalar prefix in bytes.
const CHALLENGE_LENGTH: usize = 16;

/// Error type for VRF operations.
#[derive(Debug, Snafu)]
pub enum VrfError {
    /// The proof failed verification or is structurally malformed.
    #[snafu(display("VRF proof invalid"))]
    InvalidProof,

    /// The public key bytes do not decode to a group element.
    #[snafu(display("VRF public key invalid"))]
    InvalidPublicKey,

    /// The secret key bytes do not decode to a scalar.
    #[snafu(display("VRF secret key invalid"))]
    InvalidSecretKey,
}

/// A VRF proof: `(gamma, c, s)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VrfProof {
    /// `gamma = x * H`, compressed.
    gamma: [u8; 32],
    /// Truncated challenge scalar.
    c: [u8; CHALLENGE_LENGTH],
    /// Response scalar `s = k + c * x`.
    s: [u8; 32],
}

impl VrfProof {
    /// Serializes the proof to its 80-byte wire form.
    pub fn to_bytes(&self) -> [u8; PROOF_LENGTH] {
        let mut bytes = [0u8; PROOF_LENGTH];
        bytes[..32].copy_from_slice(&self.gamma);
        bytes[32..48].copy_from_slice(&self.c);
        bytes[48..].copy_from_slice(&self.s);
        bytes
    }

    /// Deserializes a proof from its 80-byte wire form.
    ///
    /// Only length and field layout are checked here; group and scalar
    /// validity are checked during verification.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VrfError> {
        if bytes.len() != PROOF_LENGTH {
            return Err(VrfError::InvalidProof);
        }
        let mut gamma = [0u8; 32];
        let mut c = [0u8; CHALLENGE_LENGTH];
        let mut s = [0u8; 32];
        gamma.copy_from_slice(&bytes[..32]);
        c.copy_from_slice(&bytes[32..48]);
        s.copy_from_slice(&bytes[48..]);
        Ok(Self { gamma, c, s })
    }
}

/// A VRF public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VrfPublicKey {
    compressed: [u8; PUBLIC_KEY_LENGTH],
}

impl VrfPublicKey {
    /// Serializes the public key.
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.compressed
    }

    /// Deserializes a public key, checking that it decodes to a valid
    /// group element.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VrfError> {
        let compressed: [u8; 32] = bytes.try_into().map_err(|_| VrfError::InvalidPublicKey)?;
        // Reject encodings that do not decompress
        CompressedRistretto(compressed)
            .decompress()
            .ok_or(VrfError::InvalidPublicKey)?;
        Ok(Self { compressed })
    }

    /// Verifies `proof` over `alpha` and returns the proven index.
    ///
    /// # Errors
    ///
    /// Returns [`VrfError::InvalidProof`] when the proof does not verify
    /// for this key and input.
    pub fn verify(&self, alpha: &[u8], proof: &VrfProof) -> Result<Index, VrfError> {
        let y = CompressedRistretto(self.compressed)
            .decompress()
            .ok_or(VrfError::InvalidPublicKey)?;
        let gamma = CompressedRistretto(proof.gamma)
            .decompress()
            .ok_or(VrfError::InvalidProof)?;
        let s = Option::<Scalar>::from(Scalar::from_canonical_bytes(proof.s))
            .ok_or(VrfError::InvalidProof)?;
        let c = challenge_scalar(&proof.c);

        let h = hash_to_group(&self.compressed, alpha);

        // U = s*B - c*Y, V = s*H - c*Gamma
        let u = RistrettoPoint::vartime_double_scalar_mul_basepoint(&-c, &y, &s);
        let v = h * s - gamma * c;

        let expected = challenge_bytes(&self.compressed, &h, &gamma, &u, &v);
        if bool::from(expected.ct_eq(&proof.c)) {
            Ok(proof_to_index(&gamma))
        } else {
            Err(VrfError::InvalidProof)
        }
    }
}

/// A VRF key pair.
///
/// The private scalar never leaves this type except through
/// [`VrfKeyPair::to_seed_bytes`] for key-carrier export.
pub struct VrfKeyPair {
    secret: Scalar,
    public: VrfPublicKey,
}

impl VrfKeyPair {
    /// Generates a fresh key pair.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut wide = [0u8; 64];
        rng.fill_bytes(&mut wide);
        Self::from_secret(Scalar::from_bytes_mod_order_wide(&wide))
    }

    /// Derives a key pair deterministically from a 32-byte seed.
    pub fn from_seed(seed: &[u8; SECRET_KEY_LENGTH]) -> Self {
        let mut hasher = Sha512::new();
        hasher.update(b"lattica-keydir-vrf/keygen");
        hasher.update(seed);
        let wide: [u8; 64] = hasher.finalize().into();
        Self::from_secret(Scalar::from_bytes_mod_order_wide(&wide))
    }

    /// Reconstructs a key pair from exported secret scalar bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, VrfError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| VrfError::InvalidSecretKey)?;
        let secret = Option::<Scalar>::from(Scalar::from_canonical_bytes(arr))
            .ok_or(VrfError::InvalidSecretKey)?;
        Ok(Self::from_secret(secret))
    }

    fn from_secret(secret: Scalar) -> Self {
        let public =
            VrfPublicKey { compressed: RistrettoPoint::mul_base(&secret).compress().to_bytes() };
        Self { secret, public }
    }

    /// Exports the secret scalar for key carriers.
    pub fn to_secret_bytes(&self) -> [u8; SECRET_KEY_LENGTH] {
        self.secret.to_bytes()
    }

    /// The public key.
    pub fn public_key(&self) -> VrfPublicKey {
        self.public
    }

    /// Computes `(index, proof)` for `alpha`.
    ///
    /// Deterministic: the same key and input always yield the same index
    /// and an equivalent proof.
    pub fn compute(&self, alpha: &[u8]) -> (Index, VrfProof) {
        let h = hash_to_group(&self.public.compressed, alpha);
        let gamma = h * self.secret;

        // Deterministic nonce bound to the secret, the input point, and alpha
        let mut hasher = Sha512::new();
        hasher.update(DST_NONCE);
        hasher.update(self.secret.to_bytes());
        hasher.update(h.compress().to_bytes());
        hasher.update(alpha);
        let wide: [u8; 64] = hasher.finalize().into();
        let k = Scalar::from_bytes_mod_order_wide(&wide);

        let u = RistrettoPoint::mul_base(&k);
        let v = h * k;

        let c_bytes = challenge_bytes(&self.public.compressed, &h, &gamma, &u, &v);
        let c = challenge_scalar(&c_bytes);
        let s = k + c * self.secret;

        let proof =
            VrfProof { gamma: gamma.compress().to_bytes(), c: c_bytes, s: s.to_bytes() };
        (proof_to_index(&gamma), proof)
    }
}

/// Hashes `(public_key, alpha)` to a group element.
fn hash_to_group(public_key: &[u8; 32], alpha: &[u8]) -> RistrettoPoint {
    let mut hasher = Sha512::new();
    hasher.update(DST_HASH_TO_GROUP);
    hasher.update(public_key);
    hasher.update(alpha);
    let wide: [u8; 64] = hasher.finalize().into();
    RistrettoPoint::from_uniform_bytes(&wide)
}

/// Computes the truncated challenge over the five proof points.
fn challenge_bytes(
    public_key: &[u8; 32],
    h: &RistrettoPoint,
    gamma: &RistrettoPoint,
    u: &RistrettoPoint,
    v: &RistrettoPoint,
) -> [u8; CHALLENGE_LENGTH] {
    let mut hasher = Sha512::new();
    hasher.update(DST_CHALLENGE);
    hasher.update(public_key);
    hasher.update(h.compress().to_bytes());
    hasher.update(gamma.compress().to_bytes());
    hasher.update(u.compress().to_bytes());
    hasher.update(v.compress().to_bytes());
    let digest = hasher.finalize();

    let mut c = [0u8; CHALLENGE_LENGTH];
    c.copy_from_slice(&digest[..CHALLENGE_LENGTH]);
    c
}

/// Interprets the truncated challenge as a scalar.
fn challenge_scalar(c: &[u8; CHALLENGE_LENGTH]) -> Scalar {
    let mut bytes = [0u8; 32];
    bytes[..CHALLENGE_LENGTH].copy_from_slice(c);
    Scalar::from_bytes_mod_order(bytes)
}

/// Derives the 32-byte output (the map index) from `gamma`.
fn proof_to_index(gamma: &RistrettoPoint) -> Index {
    let mut hasher = Sha512::new();
    hasher.update(DST_OUTPUT);
    hasher.update(gamma.compress().to_bytes());
    let digest = hasher.finalize();

    let mut index = [0u8; 32];
    index.copy_from_slice(&digest[..32]);
    Index::new(index)
}
