#![no_main]

// Harness: stored key bytes decode to a key whose encoding is the same bytes.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use grant_store::keys::{decode_grant_key, grant_key_bytes};

#[derive(Arbitrary, Debug)]
struct KeyBytes(Vec<u8>);

fuzz_target!(|bytes: KeyBytes| {
    if let Ok(key) = decode_grant_key(&bytes.0) {
        assert_eq!(grant_key_bytes(&key), bytes.0);
    }
});
