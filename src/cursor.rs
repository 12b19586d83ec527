//! Opaque pagination cursors.
//!
//! A token is the URL-safe base64 form of `version ‖ encoded grant key`, naming the last
//! key a page returned. Resuming starts strictly after that key, so a token stays valid
//! while other keys are inserted or removed. If the named key itself is deleted the next
//! page still starts after it.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use crate::error::GrantError;
use crate::keys::{decode_grant_key, grant_key_bytes};
use crate::primitives::GrantKey;

const TOKEN_VERSION: u8 = 1;

/// Forward-only position in an ordered grant listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageToken {
    last_key: GrantKey,
}

impl PageToken {
    pub fn after(last_key: GrantKey) -> Self {
        PageToken { last_key }
    }

    pub fn last_key(&self) -> &GrantKey {
        &self.last_key
    }

    pub fn encode(&self) -> String {
        let mut raw = vec![TOKEN_VERSION];
        raw.extend_from_slice(&grant_key_bytes(&self.last_key));
        URL_SAFE_NO_PAD.encode(raw)
    }

    /// Decodes a caller-supplied token. The empty string means "from the beginning".
    pub fn decode(text: &str) -> Result<Option<PageToken>, GrantError> {
        if text.is_empty() {
            return Ok(None);
        }
        let raw = URL_SAFE_NO_PAD
            .decode(text)
            .map_err(|e| GrantError::InvalidPageToken(e.to_string()))?;
        match raw.split_first() {
            Some((&TOKEN_VERSION, key)) => decode_grant_key(key)
                .map(|last_key| Some(PageToken { last_key }))
                .map_err(|e| GrantError::InvalidPageToken(e.to_string())),
            Some((version, _)) => Err(GrantError::InvalidPageToken(format!(
                "unsupported token version {version}"
            ))),
            None => Err(GrantError::InvalidPageToken("empty token payload".into())),
        }
    }
}

/// One page of a listing. An empty `next_page_token` means there is nothing further.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: String,
}

impl<T> Page<T> {
    pub fn is_last(&self) -> bool {
        self.next_page_token.is_empty()
    }
}
