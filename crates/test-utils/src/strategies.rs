//! Proptest strategies for Lattica KeyDir domain types.
//!
//! Reusable generators for property-based testing across crates.
//!
//! # Usage
//!
//! ```no_run
//! use lattica_keydir_test_utils::strategies;
//! use proptest::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn my_property(index in strategies::arb_index()) {
//!         // test invariant with a randomly generated index
//!     }
//! }
//! ```

use lattica_keydir_types::hash::Hash;
use lattica_keydir_types::types::{DirectoryId, Index, UserId};
use proptest::prelude::*;

/// Generates a URL-safe directory id of 1-16 characters.
pub fn arb_directory_id() -> impl Strategy<Value = DirectoryId> {
    "[a-z][a-z0-9._-]{0,15}".prop_map(DirectoryId::new)
}

/// Generates an opaque user id of 1-64 bytes.
pub fn arb_user_id() -> impl Strategy<Value = UserId> {
    proptest::collection::vec(any::<u8>(), 1..=64).prop_map(UserId::new)
}

/// Generates a uniformly random 256-bit index.
pub fn arb_index() -> impl Strategy<Value = Index> {
    any::<[u8; 32]>().prop_map(Index::new)
}

/// Generates a uniformly random 32-byte digest.
pub fn arb_hash() -> impl Strategy<Value = Hash> {
    any::<[u8; 32]>()
}

/// Generates profile bytes of 0-128 bytes.
pub fn arb_profile() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 0..=128)
}

/// Generates a small set of distinct indexes, for batch-write properties.
pub fn arb_index_set(max: usize) -> impl Strategy<Value = Vec<Index>> {
    proptest::collection::btree_set(any::<[u8; 32]>(), 1..=max)
        .prop_map(|set| set.into_iter().map(Index::new).collect())
}
