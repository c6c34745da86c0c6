//! Fuzz target for the canonical entry codec.
//!
//! Arbitrary bytes fed to the decoder for wire types must never panic,
//! and successfully decoded values must re-encode to the same bytes
//! (canonical form is stable).

#![no_main]

use libfuzzer_sys::fuzz_target;

use lattica_keydir_types::codec::{decode, encode};
use lattica_keydir_types::types::{
    Committed, Entry, EntryUpdate, MutationProof, QueuedUpdate, SignedEntry, SignedLogRoot,
    SignedMapRoot,
};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let selector = data[0] % 8;
    let payload = &data[1..];

    match selector {
        0 => try_roundtrip::<Entry>(payload),
        1 => try_roundtrip::<SignedEntry>(payload),
        2 => try_roundtrip::<Committed>(payload),
        3 => try_roundtrip::<EntryUpdate>(payload),
        4 => try_roundtrip::<QueuedUpdate>(payload),
        5 => try_roundtrip::<SignedMapRoot>(payload),
        6 => try_roundtrip::<SignedLogRoot>(payload),
        _ => try_roundtrip::<MutationProof>(payload),
    }
});

/// Attempts to decode arbitrary bytes as `T`; on success, the re-encoded
/// canonical bytes must decode to an equal value.
fn try_roundtrip<T>(data: &[u8])
where
    T: serde::Serialize + serde::de::DeserializeOwned + PartialEq + std::fmt::Debug,
{
    let Ok(value) = decode::<T>(data) else {
        return;
    };
    let bytes = encode(&value).expect("re-encoding a decoded value");
    let again = decode::<T>(&bytes).expect("decoding canonical bytes");
    assert_eq!(value, again, "canonical roundtrip mismatch");
}
