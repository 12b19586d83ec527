#![no_main]

// Any string either fails to parse or re-renders to exactly the same text.

use libfuzzer_sys::fuzz_target;
use grant_store::Principal;

fuzz_target!(|text: &str| {
    if let Ok((prefix, principal)) = Principal::parse(text) {
        let rendered = principal.to_text(&prefix);
        assert_eq!(rendered.to_ascii_lowercase(), text.to_ascii_lowercase());
    }
});
