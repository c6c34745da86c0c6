//! Fuzz target for the mutation validator.
//!
//! The validator is pure, so it can be driven with fully synthesized
//! leaves and updates: arbitrary bytes must never panic it, only produce
//! validation errors.

#![no_main]

use libfuzzer_sys::fuzz_target;

use lattica_keydir_core::validator::validate_update;
use lattica_keydir_types::types::{EntryUpdate, Index, SignedEntry, UserId};

fuzz_target!(|data: &[u8]| {
    if data.len() < 33 {
        return;
    }

    let mut index_bytes = [0u8; 32];
    index_bytes.copy_from_slice(&data[..32]);
    let index = Index::new(index_bytes);

    let selector = data[32] % 3;
    let payload = &data[33..];
    let split = payload.len() / 2;

    let update = EntryUpdate {
        user_id: UserId::new(vec![0x01]),
        mutation: SignedEntry { entry: payload[..split].to_vec(), signatures: vec![] },
        committed: None,
    };

    match selector {
        // Empty slot
        0 => {
            let _ = validate_update(&index, None, &update);
        },
        // Arbitrary current leaf bytes
        1 => {
            let _ = validate_update(&index, Some(&payload[split..]), &update);
        },
        // Arbitrary bytes fed through the leaf decoder first
        _ => {
            if let Ok(current) = SignedEntry::from_leaf_bytes(&payload[split..]) {
                if let Ok(leaf) = current.canonical_bytes() {
                    let _ = validate_update(&index, Some(&leaf), &update);
                }
            }
        },
    }
});
