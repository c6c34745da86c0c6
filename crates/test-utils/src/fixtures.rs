//! Domain fixtures: users with key pairs, signed entry chains, and
//! directory settings tuned for fast tests.

use std::time::Duration;

use ed25519_dalek::SigningKey;
use lattica_keydir_types::commitment::{commit, sample_nonce};
use lattica_keydir_types::config::DirectorySettings;
use lattica_keydir_types::hash::{Hash, ZERO_HASH};
use lattica_keydir_types::keyset::{EntrySignature, KeySet};
use lattica_keydir_types::types::{Committed, Entry, EntryUpdate, Index, SignedEntry, UserId};
use rand::rngs::OsRng;

/// A test user with a stable id and a signing key.
pub struct TestUser {
    /// The opaque user id.
    pub user_id: UserId,
    /// The user's current signing key.
    pub key: SigningKey,
}

impl TestUser {
    /// Creates a user named `name` with a fresh key.
    pub fn new(name: &str) -> Self {
        Self { user_id: UserId::from(name), key: SigningKey::generate(&mut OsRng) }
    }

    /// Rotates to a fresh key, returning the old one.
    pub fn rotate_key(&mut self) -> SigningKey {
        std::mem::replace(&mut self.key, SigningKey::generate(&mut OsRng))
    }
}

/// Builds a signed entry with a commitment over `profile`, signed by
/// `signers`, authorized for `authorized`.
///
/// Returns the update (with its commitment opening attached) so it can go
/// straight onto the write path.
pub fn profile_update(
    user: &TestUser,
    index: Index,
    previous: Hash,
    profile: &[u8],
    authorized: &[&SigningKey],
    signers: &[&SigningKey],
) -> EntryUpdate {
    let nonce = sample_nonce();
    let entry = Entry {
        index,
        commitment: commit(&nonce, profile),
        authorized_keys: KeySet::from_ed25519(
            authorized.iter().map(|key| key.verifying_key()).collect::<Vec<_>>().iter(),
        ),
        previous,
    };
    let entry_bytes = entry.canonical_bytes().expect("encode entry");
    let signatures = signers
        .iter()
        .map(|key| EntrySignature::sign_ed25519(key, &entry_bytes))
        .collect();

    EntryUpdate {
        user_id: user.user_id.clone(),
        mutation: SignedEntry { entry: entry_bytes, signatures },
        committed: Some(Committed { key: nonce, data: profile.to_vec() }),
    }
}

/// An initial entry (previous = zero digest) self-signed by the user.
pub fn initial_update(user: &TestUser, index: Index, profile: &[u8]) -> EntryUpdate {
    profile_update(user, index, ZERO_HASH, profile, &[&user.key], &[&user.key])
}

/// A successor of `current`, signed by `signers` and authorizing
/// `authorized`.
pub fn successor_update(
    user: &TestUser,
    index: Index,
    current: &SignedEntry,
    profile: &[u8],
    authorized: &[&SigningKey],
    signers: &[&SigningKey],
) -> EntryUpdate {
    profile_update(user, index, current.entry_digest(), profile, authorized, signers)
}

/// Directory settings with intervals short enough for tests to observe
/// several revisions per second.
pub fn fast_settings() -> DirectorySettings {
    DirectorySettings::builder()
        .min_interval(Duration::from_millis(10))
        .max_interval(Duration::from_millis(500))
        .publish_empty_revisions(true)
        .max_batch_size(64)
        .build()
}
