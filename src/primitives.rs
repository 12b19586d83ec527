use std::fmt;
use std::str::FromStr;

use crate::error::AddressError;

// --- Principals -------------------------------------------------------------

/// Length in bytes of every account address.
pub const ADDRESS_LEN: usize = 20;
/// Trailing checksum bytes carried by the text form.
const CHECKSUM_LEN: usize = 4;
/// Separates the human-readable prefix from the hex payload.
const SEPARATOR: char = '1';
/// Prefix used by `Display` and `FromStr`.
pub const DEFAULT_ADDRESS_PREFIX: &str = "acct";

/// An account identity: either side of a grant.
///
/// The text form is `<prefix>1<hex(address ‖ checksum)>`, where the checksum is the first
/// four bytes of `blake3(prefix ‖ address)`. The prefix may only contain lowercase ASCII
/// letters, so the first `1` always ends it.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Principal(#[serde(with = "serde_bytes")] [u8; ADDRESS_LEN]);

impl Principal {
    pub const fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Self {
        Principal(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Renders the checksummed text form under `prefix`.
    pub fn to_text(&self, prefix: &str) -> String {
        let mut payload = Vec::with_capacity(ADDRESS_LEN + CHECKSUM_LEN);
        payload.extend_from_slice(&self.0);
        payload.extend_from_slice(&checksum(prefix, &self.0));
        format!("{prefix}{SEPARATOR}{}", hex::encode(payload))
    }

    /// Decodes a text address carrying any well-formed prefix, returning the prefix too.
    pub fn parse(text: &str) -> Result<(String, Principal), AddressError> {
        let (prefix, payload) = text
            .split_once(SEPARATOR)
            .ok_or(AddressError::MissingSeparator)?;
        if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_lowercase()) {
            return Err(AddressError::InvalidPrefix(prefix.to_string()));
        }

        let has_lower = payload.bytes().any(|b| b.is_ascii_lowercase());
        let has_upper = payload.bytes().any(|b| b.is_ascii_uppercase());
        if has_lower && has_upper {
            return Err(AddressError::InvalidPayload("mixed-case payload".into()));
        }
        let raw = hex::decode(payload).map_err(|e| AddressError::InvalidPayload(e.to_string()))?;
        if raw.len() != ADDRESS_LEN + CHECKSUM_LEN {
            return Err(AddressError::InvalidLength {
                expected: ADDRESS_LEN,
                found: raw.len().saturating_sub(CHECKSUM_LEN),
            });
        }

        let (addr, sum) = raw.split_at(ADDRESS_LEN);
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes.copy_from_slice(addr);
        if sum != checksum(prefix, &bytes) {
            return Err(AddressError::ChecksumMismatch);
        }
        Ok((prefix.to_string(), Principal(bytes)))
    }

    /// Decodes a text address and requires it to carry `expected` as its prefix.
    pub fn parse_with_prefix(text: &str, expected: &str) -> Result<Principal, AddressError> {
        let (found, principal) = Self::parse(text)?;
        if found != expected {
            return Err(AddressError::UnexpectedPrefix {
                expected: expected.to_string(),
                found,
            });
        }
        Ok(principal)
    }
}

fn checksum(prefix: &str, addr: &[u8; ADDRESS_LEN]) -> [u8; CHECKSUM_LEN] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(prefix.as_bytes());
    hasher.update(addr);
    let digest = hasher.finalize();
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest.as_bytes()[..CHECKSUM_LEN]);
    out
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text(DEFAULT_ADDRESS_PREFIX))
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Principal({})", self)
    }
}

impl FromStr for Principal {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Principal::parse_with_prefix(s, DEFAULT_ADDRESS_PREFIX)
    }
}

// --- Action types -----------------------------------------------------------

/// Category of action a grant covers, e.g. a message type name.
///
/// Opaque to the store; it only partitions grants between one granter and grantee.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ActionType(String);

impl ActionType {
    pub fn new(name: impl Into<String>) -> Self {
        ActionType(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for ActionType {
    fn from(name: &str) -> Self {
        ActionType::new(name)
    }
}

impl From<String> for ActionType {
    fn from(name: String) -> Self {
        ActionType(name)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// --- Grant keys -------------------------------------------------------------

/// Identity of a delegation. At most one record exists per key.
///
/// The derived ordering (granter, grantee, action type) matches the byte ordering of the
/// encoded key, see [`crate::keys`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct GrantKey {
    pub granter: Principal,
    pub grantee: Principal,
    pub action_type: ActionType,
}

impl GrantKey {
    pub fn new(granter: Principal, grantee: Principal, action_type: impl Into<ActionType>) -> Self {
        GrantKey {
            granter,
            grantee,
            action_type: action_type.into(),
        }
    }

    pub fn is_self_grant(&self) -> bool {
        self.granter == self.grantee
    }
}
