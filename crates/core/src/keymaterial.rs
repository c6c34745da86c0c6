//! Opaque key-material carriers for the admin surface.
//!
//! `CreateDirectory` optionally accepts caller-supplied VRF and root-signing
//! keys. Key material travels as a typed blob whose interpretation is
//! delegated by `type_url`, so the admin wire format stays closed over new
//! key types.

use lattica_keydir_backend::Ed25519Signer;
use lattica_keydir_vrf::VrfKeyPair;
use serde::{Deserialize, Serialize};

use lattica_keydir_types::KeydirError;

/// Type URL for a VRF secret scalar (32 bytes).
pub const VRF_SECRET_TYPE_URL: &str = "type.lattica.dev/keydir.VrfSecret";
/// Type URL for an Ed25519 seed (32 bytes).
pub const ED25519_SEED_TYPE_URL: &str = "type.lattica.dev/keydir.Ed25519Seed";

/// An opaque typed key blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMaterial {
    /// Identifies how `value` is to be interpreted.
    pub type_url: String,
    /// Raw key bytes.
    pub value: Vec<u8>,
}

/// Caller-supplied keys for directory creation. Absent fields are
/// generated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryKeyMaterial {
    /// VRF private key.
    pub vrf: Option<KeyMaterial>,
    /// Map-root signing key.
    pub map_signer: Option<KeyMaterial>,
    /// Log-root signing key.
    pub log_signer: Option<KeyMaterial>,
}

/// Decodes a VRF key pair from a carrier.
pub fn decode_vrf(material: &KeyMaterial) -> Result<VrfKeyPair, KeydirError> {
    if material.type_url != VRF_SECRET_TYPE_URL {
        return Err(KeydirError::invalid_argument(format!(
            "unsupported VRF key type: {}",
            material.type_url
        )));
    }
    VrfKeyPair::from_secret_bytes(&material.value)
        .map_err(|err| KeydirError::invalid_argument(format!("bad VRF key material: {err}")))
}

/// Decodes an Ed25519 signer from a carrier.
pub fn decode_signer(material: &KeyMaterial) -> Result<Ed25519Signer, KeydirError> {
    if material.type_url != ED25519_SEED_TYPE_URL {
        return Err(KeydirError::invalid_argument(format!(
            "unsupported signing key type: {}",
            material.type_url
        )));
    }
    Ed25519Signer::from_seed_bytes(&material.value)
        .ok_or_else(|| KeydirError::invalid_argument("bad Ed25519 seed length"))
}

/// Wraps a VRF key pair for export.
pub fn export_vrf(pair: &VrfKeyPair) -> KeyMaterial {
    KeyMaterial {
        type_url: VRF_SECRET_TYPE_URL.to_string(),
        value: pair.to_secret_bytes().to_vec(),
    }
}

/// Wraps an Ed25519 signer for export.
pub fn export_signer(signer: &Ed25519Signer) -> KeyMaterial {
    KeyMaterial {
        type_url: ED25519_SEED_TYPE_URL.to_string(),
        value: signer.to_seed_bytes().to_vec(),
    }
}
