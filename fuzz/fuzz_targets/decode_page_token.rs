#![no_main]

use libfuzzer_sys::fuzz_target;
use grant_store::PageToken;

fuzz_target!(|text: &str| {
    if let Ok(Some(token)) = PageToken::decode(text) {
        let again = PageToken::decode(&token.encode()).unwrap();
        assert_eq!(again, Some(token));
    }
});
