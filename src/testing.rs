//! Fixtures shared by unit tests, integration tests and benches.

use chrono::{DateTime, TimeZone, Utc};

use crate::capability::Capability;
use crate::primitives::{GrantKey, Principal, ADDRESS_LEN};
use crate::record::GrantRecord;

/// Deterministic principal whose bytes are all `seed`.
pub fn principal(seed: u8) -> Principal {
    Principal::from_bytes([seed; ADDRESS_LEN])
}

pub fn alice() -> Principal {
    principal(0xa1)
}

pub fn bob() -> Principal {
    principal(0xb0)
}

pub fn carol() -> Principal {
    principal(0xca)
}

/// `secs` seconds after the Unix epoch.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// A generic grant record for `action`, expiring at `at(exp)` when given.
pub fn generic_record(action: &str, exp: Option<i64>) -> GrantRecord {
    GrantRecord::new(
        Capability::generic(action).encode().unwrap_or_else(|e| panic!("encoding fixture: {e}")),
        exp.map(at),
    )
}

pub fn key(granter: Principal, grantee: Principal, action: &str) -> GrantKey {
    GrantKey::new(granter, grantee, action)
}
