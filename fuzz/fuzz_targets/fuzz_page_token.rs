//! Fuzz target for page token parsing.
//!
//! `PageTokenCodec::decode` must never panic on arbitrary strings, and
//! tokens from `encode` must always roundtrip under the issuing key and
//! fail under any other key.

#![no_main]

use libfuzzer_sys::fuzz_target;

use lattica_keydir_core::paginate::{PageToken, PageTokenCodec};

fuzz_target!(|data: &[u8]| {
    if data.len() < 17 {
        return;
    }

    let selector = data[0] % 2;
    let payload = &data[1..];

    match selector {
        0 => fuzz_decode_arbitrary(payload),
        _ => fuzz_roundtrip(payload),
    }
});

fn fuzz_decode_arbitrary(data: &[u8]) {
    if let Ok(s) = std::str::from_utf8(data) {
        let codec = PageTokenCodec::new([0u8; 32]);
        let _ = codec.decode(s, "d1", 0);
    }
}

fn fuzz_roundtrip(data: &[u8]) {
    let revision = u64::from_le_bytes([
        data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
    ]);
    let position = u64::from_le_bytes([
        data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
    ]);
    let directory_id = String::from_utf8_lossy(&data[16..]).into_owned();

    let token = PageToken::new(&directory_id, revision, position);
    let codec = PageTokenCodec::new([42u8; 32]);
    let encoded = codec.encode(&token);

    let decoded = codec.decode(&encoded, &directory_id, revision);
    assert_eq!(decoded.ok().as_ref(), Some(&token), "roundtrip mismatch");

    let other = PageTokenCodec::new([99u8; 32]);
    assert!(other.decode(&encoded, &directory_id, revision).is_err());
}
