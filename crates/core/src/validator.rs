//! Mutation validation and authorization.
//!
//! The validator is a pure function over the expected index, the current
//! leaf (if any), and a submitted update. It performs no I/O and reads no
//! clock, which keeps it usable both on the write path (against a candidate
//! leaf) and inside the sequencer (against the authoritative leaf), and
//! makes it directly fuzzable with synthesized leaves.
//!
//! Authorization rule: a non-initial update must carry a signature
//! verifying under the *current* entry's authorized keys and a signature
//! verifying under the *new* entry's authorized keys. One signature may
//! satisfy both requirements only when the same key appears in both sets.

use lattica_keydir_types::commitment;
use lattica_keydir_types::hash::{sha256, ZERO_HASH};
use lattica_keydir_types::types::{Entry, EntryUpdate, Index, SignedEntry};
use lattica_keydir_types::KeydirError;
use snafu::Snafu;

/// Validation failure for a single mutation.
#[derive(Debug, Snafu)]
pub enum MutationError {
    /// The update is structurally malformed.
    #[snafu(display("malformed mutation: {message}"))]
    InvalidShape {
        /// What failed to parse or was missing.
        message: String,
    },

    /// The entry's index does not match the VRF index for the user.
    #[snafu(display("entry index does not match the user's VRF index"))]
    IndexMismatch,

    /// The supplied commitment opening does not match the entry commitment.
    #[snafu(display("commitment opening does not match entry commitment"))]
    CommitmentMismatch,

    /// The `previous` digest does not match the current entry.
    #[snafu(display("previous-entry digest mismatch: expected {expected}, got {got}"))]
    PreviousMismatch {
        /// Hex digest of the current entry (all zeros when absent).
        expected: String,
        /// Hex digest the mutation carried.
        got: String,
    },

    /// The new authorized key set is empty.
    #[snafu(display("authorized key set must not be empty"))]
    EmptyKeySet,

    /// Signature requirements not met.
    #[snafu(display("unauthorized mutation: {message}"))]
    Unauthorized {
        /// Which signature requirement failed.
        message: String,
    },
}

impl From<MutationError> for KeydirError {
    fn from(err: MutationError) -> Self {
        match err {
            MutationError::InvalidShape { message } => KeydirError::InvalidArgument { message },
            MutationError::IndexMismatch => {
                KeydirError::invalid_argument("entry index does not match VRF index")
            },
            MutationError::CommitmentMismatch => KeydirError::CommitmentMismatch,
            MutationError::PreviousMismatch { expected, got } => {
                KeydirError::PreviousMismatch { expected, got }
            },
            MutationError::EmptyKeySet => {
                KeydirError::invalid_argument("authorized key set must not be empty")
            },
            MutationError::Unauthorized { message } => KeydirError::Unauthorized { message },
        }
    }
}

/// A mutation that passed validation, ready to stage into the map.
#[derive(Debug, Clone)]
pub struct ValidatedMutation {
    /// The slot the new leaf goes to.
    pub index: Index,
    /// The new leaf value (canonical `SignedEntry` bytes).
    pub new_leaf: Vec<u8>,
    /// Serialized commitment opening to store alongside the leaf.
    pub extra_data: Option<Vec<u8>>,
}

/// Validates `update` against the current leaf at `expected_index`.
///
/// `current_leaf` is the canonical `SignedEntry` bytes currently stored at
/// the index, or `None` for an empty slot. The caller supplies
/// `expected_index` from the VRF so this function stays free of key
/// material.
pub fn validate_update(
    expected_index: &Index,
    current_leaf: Option<&[u8]>,
    update: &EntryUpdate,
) -> Result<ValidatedMutation, MutationError> {
    let entry: Entry = update.mutation.parse_entry().map_err(|err| {
        MutationError::InvalidShape { message: format!("undecodable entry: {err}") }
    })?;

    if entry.index != *expected_index {
        return Err(MutationError::IndexMismatch);
    }
    if update.mutation.signatures.is_empty() {
        return Err(MutationError::InvalidShape { message: "no signatures".to_string() });
    }
    if entry.authorized_keys.is_empty() {
        return Err(MutationError::EmptyKeySet);
    }

    if let Some(committed) = &update.committed {
        if !commitment::verify(&committed.key, &committed.data, &entry.commitment) {
            return Err(MutationError::CommitmentMismatch);
        }
    }

    let entry_bytes = &update.mutation.entry;
    match current_leaf {
        None => {
            if entry.previous != ZERO_HASH {
                return Err(MutationError::PreviousMismatch {
                    expected: hex::encode(ZERO_HASH),
                    got: hex::encode(entry.previous),
                });
            }
            if !entry.authorized_keys.verify_any(entry_bytes, &update.mutation.signatures) {
                return Err(MutationError::Unauthorized {
                    message: "initial entry not signed by its own key set".to_string(),
                });
            }
        },
        Some(leaf_bytes) => {
            let current = SignedEntry::from_leaf_bytes(leaf_bytes).map_err(|err| {
                MutationError::InvalidShape { message: format!("undecodable current leaf: {err}") }
            })?;
            let current_entry: Entry = current.parse_entry().map_err(|err| {
                MutationError::InvalidShape {
                    message: format!("undecodable current entry: {err}"),
                }
            })?;

            let expected_previous = sha256(&current.entry);
            if entry.previous != expected_previous {
                return Err(MutationError::PreviousMismatch {
                    expected: hex::encode(expected_previous),
                    got: hex::encode(entry.previous),
                });
            }

            if !current_entry
                .authorized_keys
                .verify_any(entry_bytes, &update.mutation.signatures)
            {
                return Err(MutationError::Unauthorized {
                    message: "no signature under the current authorized keys".to_string(),
                });
            }
            if !entry.authorized_keys.verify_any(entry_bytes, &update.mutation.signatures) {
                return Err(MutationError::Unauthorized {
                    message: "no signature under the new authorized keys".to_string(),
                });
            }
        },
    }

    let new_leaf = update.mutation.canonical_bytes().map_err(|err| {
        MutationError::InvalidShape { message: format!("unencodable mutation: {err}") }
    })?;
    let extra_data = match &update.committed {
        Some(committed) => {
            Some(lattica_keydir_types::codec::encode(committed).map_err(|err| {
                MutationError::InvalidShape {
                    message: format!("unencodable commitment opening: {err}"),
                }
            })?)
        },
        None => None,
    };

    Ok(ValidatedMutation { index: entry.index, new_leaf, extra_data })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ed25519_dalek::SigningKey;
    use lattica_keydir_types::commitment::{commit, sample_nonce};
    use lattica_keydir_types::keyset::{EntrySignature, KeySet};
    use lattica_keydir_types::types::{Committed, UserId};
    use rand::rngs::OsRng;

    use super::*;

    fn index() -> Index {
        Index::new([0x42; 32])
    }

    fn entry_with(previous: [u8; 32], keys: &KeySet, commitment_hash: [u8; 32]) -> Entry {
        Entry {
            index: index(),
            commitment: commitment_hash,
            authorized_keys: keys.clone(),
            previous,
        }
    }

    fn signed(entry: &Entry, signers: &[&SigningKey]) -> SignedEntry {
        let bytes = entry.canonical_bytes().unwrap();
        let signatures =
            signers.iter().map(|key| EntrySignature::sign_ed25519(key, &bytes)).collect();
        SignedEntry { entry: bytes, signatures }
    }

    fn update_for(mutation: SignedEntry, committed: Option<Committed>) -> EntryUpdate {
        EntryUpdate { user_id: UserId::from("alice"), mutation, committed }
    }

    #[test]
    fn test_initial_entry_accepted() {
        let key = SigningKey::generate(&mut OsRng);
        let keys = KeySet::from_ed25519([&key.verifying_key()]);
        let entry = entry_with(ZERO_HASH, &keys, [0u8; 32]);
        let update = update_for(signed(&entry, &[&key]), None);

        let validated = validate_update(&index(), None, &update).unwrap();
        assert_eq!(validated.index, index());
        assert_eq!(validated.new_leaf, update.mutation.canonical_bytes().unwrap());
        assert!(validated.extra_data.is_none());
    }

    #[test]
    fn test_initial_entry_with_nonzero_previous_rejected() {
        let key = SigningKey::generate(&mut OsRng);
        let keys = KeySet::from_ed25519([&key.verifying_key()]);
        let entry = entry_with([7u8; 32], &keys, [0u8; 32]);
        let update = update_for(signed(&entry, &[&key]), None);

        assert!(matches!(
            validate_update(&index(), None, &update),
            Err(MutationError::PreviousMismatch { .. })
        ));
    }

    #[test]
    fn test_initial_entry_signed_by_foreign_key_rejected() {
        let key = SigningKey::generate(&mut OsRng);
        let outsider = SigningKey::generate(&mut OsRng);
        let keys = KeySet::from_ed25519([&key.verifying_key()]);
        let entry = entry_with(ZERO_HASH, &keys, [0u8; 32]);
        let update = update_for(signed(&entry, &[&outsider]), None);

        assert!(matches!(
            validate_update(&index(), None, &update),
            Err(MutationError::Unauthorized { .. })
        ));
    }

    #[test]
    fn test_index_mismatch_rejected() {
        let key = SigningKey::generate(&mut OsRng);
        let keys = KeySet::from_ed25519([&key.verifying_key()]);
        let entry = entry_with(ZERO_HASH, &keys, [0u8; 32]);
        let update = update_for(signed(&entry, &[&key]), None);

        let other_index = Index::new([0x43; 32]);
        assert!(matches!(
            validate_update(&other_index, None, &update),
            Err(MutationError::IndexMismatch)
        ));
    }

    #[test]
    fn test_empty_key_set_rejected() {
        let key = SigningKey::generate(&mut OsRng);
        let entry = entry_with(ZERO_HASH, &KeySet::default(), [0u8; 32]);
        let update = update_for(signed(&entry, &[&key]), None);

        assert!(matches!(
            validate_update(&index(), None, &update),
            Err(MutationError::EmptyKeySet)
        ));
    }

    #[test]
    fn test_commitment_opening_verified() {
        let key = SigningKey::generate(&mut OsRng);
        let keys = KeySet::from_ed25519([&key.verifying_key()]);
        let nonce = sample_nonce();
        let entry = entry_with(ZERO_HASH, &keys, commit(&nonce, b"profile A"));

        let good = Committed { key: nonce, data: b"profile A".to_vec() };
        let update = update_for(signed(&entry, &[&key]), Some(good));
        let validated = validate_update(&index(), None, &update).unwrap();
        assert!(validated.extra_data.is_some());

        let bad = Committed { key: nonce, data: b"profile B".to_vec() };
        let update = update_for(signed(&entry, &[&key]), Some(bad));
        assert!(matches!(
            validate_update(&index(), None, &update),
            Err(MutationError::CommitmentMismatch)
        ));
    }

    #[test]
    fn test_rotation_requires_both_sets() {
        let old_key = SigningKey::generate(&mut OsRng);
        let new_key = SigningKey::generate(&mut OsRng);
        let old_set = KeySet::from_ed25519([&old_key.verifying_key()]);
        let new_set = KeySet::from_ed25519([&new_key.verifying_key()]);

        let current_entry = entry_with(ZERO_HASH, &old_set, [0u8; 32]);
        let current = signed(&current_entry, &[&old_key]);
        let current_leaf = current.canonical_bytes().unwrap();

        let next = entry_with(sha256(&current.entry), &new_set, [1u8; 32]);

        // Signed by both: accepted
        let update = update_for(signed(&next, &[&old_key, &new_key]), None);
        assert!(validate_update(&index(), Some(&current_leaf), &update).is_ok());

        // Signed only by the new key: rejected (old set unsatisfied)
        let update = update_for(signed(&next, &[&new_key]), None);
        assert!(matches!(
            validate_update(&index(), Some(&current_leaf), &update),
            Err(MutationError::Unauthorized { .. })
        ));

        // Signed only by the old key: rejected (new set unsatisfied)
        let update = update_for(signed(&next, &[&old_key]), None);
        assert!(matches!(
            validate_update(&index(), Some(&current_leaf), &update),
            Err(MutationError::Unauthorized { .. })
        ));
    }

    #[test]
    fn test_same_key_in_both_sets_needs_one_signature() {
        let key = SigningKey::generate(&mut OsRng);
        let keys = KeySet::from_ed25519([&key.verifying_key()]);

        let current_entry = entry_with(ZERO_HASH, &keys, [0u8; 32]);
        let current = signed(&current_entry, &[&key]);
        let current_leaf = current.canonical_bytes().unwrap();

        let next = entry_with(sha256(&current.entry), &keys, [1u8; 32]);
        let update = update_for(signed(&next, &[&key]), None);

        assert!(validate_update(&index(), Some(&current_leaf), &update).is_ok());
    }

    #[test]
    fn test_stale_previous_rejected() {
        let key = SigningKey::generate(&mut OsRng);
        let keys = KeySet::from_ed25519([&key.verifying_key()]);

        let current_entry = entry_with(ZERO_HASH, &keys, [0u8; 32]);
        let current = signed(&current_entry, &[&key]);
        let current_leaf = current.canonical_bytes().unwrap();

        // Points at ZERO_HASH instead of the current entry digest
        let stale = entry_with(ZERO_HASH, &keys, [1u8; 32]);
        let update = update_for(signed(&stale, &[&key]), None);

        assert!(matches!(
            validate_update(&index(), Some(&current_leaf), &update),
            Err(MutationError::PreviousMismatch { .. })
        ));
    }

    #[test]
    fn test_resubmission_after_apply_is_previous_mismatch() {
        let key = SigningKey::generate(&mut OsRng);
        let keys = KeySet::from_ed25519([&key.verifying_key()]);

        let entry = entry_with(ZERO_HASH, &keys, [0u8; 32]);
        let mutation = signed(&entry, &[&key]);
        let update = update_for(mutation.clone(), None);

        // First submission lands
        let validated = validate_update(&index(), None, &update).unwrap();
        // Resubmitting the identical mutation against the applied leaf fails
        assert!(matches!(
            validate_update(&index(), Some(&validated.new_leaf), &update),
            Err(MutationError::PreviousMismatch { .. })
        ));
    }

    #[test]
    fn test_unsigned_mutation_rejected() {
        let key = SigningKey::generate(&mut OsRng);
        let keys = KeySet::from_ed25519([&key.verifying_key()]);
        let entry = entry_with(ZERO_HASH, &keys, [0u8; 32]);
        let mutation = SignedEntry::new(&entry, vec![]).unwrap();
        let update = update_for(mutation, None);

        assert!(matches!(
            validate_update(&index(), None, &update),
            Err(MutationError::InvalidShape { .. })
        ));
    }

    #[test]
    fn test_garbage_entry_bytes_rejected() {
        let update = update_for(
            SignedEntry { entry: vec![0xff; 3], signatures: vec![] },
            None,
        );
        assert!(matches!(
            validate_update(&index(), None, &update),
            Err(MutationError::InvalidShape { .. })
        ));
    }
}
