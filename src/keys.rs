//! Byte layout of stored keys.
//!
//! Grants live under `0x01 ‖ granter ‖ grantee ‖ action_type`. Both principals are
//! fixed-length, so every action type for one (granter, grantee) pair shares the
//! contiguous prefix `0x01 ‖ granter ‖ grantee`, and every grant issued by a granter
//! shares `0x01 ‖ granter`.
//!
//! Grants with an expiration also get an expiry-queue entry under
//! `0x02 ‖ sortable(expiration µs) ‖ granter ‖ grantee ‖ action_type` with an empty value,
//! so cleanup can walk grants in expiration order.

use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::primitives::{ActionType, GrantKey, Principal, ADDRESS_LEN};

pub(crate) const GRANT_PREFIX: u8 = 0x01;
pub(crate) const EXPIRY_QUEUE_PREFIX: u8 = 0x02;

const TIME_LEN: usize = 8;

pub fn granter_prefix(granter: &Principal) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(1 + ADDRESS_LEN);
    bytes.push(GRANT_PREFIX);
    bytes.extend_from_slice(granter.as_bytes());
    bytes
}

pub fn pair_prefix(granter: &Principal, grantee: &Principal) -> Vec<u8> {
    let mut bytes = granter_prefix(granter);
    bytes.extend_from_slice(grantee.as_bytes());
    bytes
}

pub fn grant_key_bytes(key: &GrantKey) -> Vec<u8> {
    let mut bytes = pair_prefix(&key.granter, &key.grantee);
    bytes.extend_from_slice(key.action_type.as_str().as_bytes());
    bytes
}

/// Everything in the grant namespace.
pub fn all_grants_prefix() -> Vec<u8> {
    vec![GRANT_PREFIX]
}

pub fn decode_grant_key(bytes: &[u8]) -> Result<GrantKey, StorageError> {
    match bytes.split_first() {
        Some((&GRANT_PREFIX, rest)) => decode_key_body(rest),
        _ => Err(StorageError::Corrupt(format!(
            "not a grant key: {}",
            hex::encode(bytes)
        ))),
    }
}

fn decode_key_body(rest: &[u8]) -> Result<GrantKey, StorageError> {
    if rest.len() < 2 * ADDRESS_LEN {
        return Err(StorageError::Corrupt(format!(
            "grant key too short: {} bytes",
            rest.len()
        )));
    }
    let (granter, rest) = rest.split_at(ADDRESS_LEN);
    let (grantee, action) = rest.split_at(ADDRESS_LEN);
    let action = std::str::from_utf8(action)
        .map_err(|e| StorageError::Corrupt(format!("action type is not utf-8: {e}")))?;
    Ok(GrantKey {
        granter: principal_from_slice(granter),
        grantee: principal_from_slice(grantee),
        action_type: ActionType::new(action),
    })
}

fn principal_from_slice(slice: &[u8]) -> Principal {
    let mut bytes = [0u8; ADDRESS_LEN];
    bytes.copy_from_slice(slice);
    Principal::from_bytes(bytes)
}

/// Maps a signed microsecond timestamp onto big-endian bytes whose byte order is time order.
fn sortable_micros(micros: i64) -> [u8; TIME_LEN] {
    ((micros as u64) ^ (1 << 63)).to_be_bytes()
}

fn micros_from_sortable(bytes: [u8; TIME_LEN]) -> i64 {
    (u64::from_be_bytes(bytes) ^ (1 << 63)) as i64
}

pub fn expiry_queue_key(expiration: &DateTime<Utc>, key: &GrantKey) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(1 + TIME_LEN + 2 * ADDRESS_LEN + key.action_type.as_str().len());
    bytes.push(EXPIRY_QUEUE_PREFIX);
    bytes.extend_from_slice(&sortable_micros(expiration.timestamp_micros()));
    bytes.extend_from_slice(key.granter.as_bytes());
    bytes.extend_from_slice(key.grantee.as_bytes());
    bytes.extend_from_slice(key.action_type.as_str().as_bytes());
    bytes
}

pub fn expiry_queue_prefix() -> Vec<u8> {
    vec![EXPIRY_QUEUE_PREFIX]
}

/// Exclusive upper bound covering every queue entry whose expiration is at or before `now`.
pub fn expiry_queue_end(now: &DateTime<Utc>) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(1 + TIME_LEN);
    bytes.push(EXPIRY_QUEUE_PREFIX);
    bytes.extend_from_slice(&sortable_micros(now.timestamp_micros().saturating_add(1)));
    bytes
}

/// Splits a queue entry into its expiration (µs since the epoch) and grant key.
pub fn decode_expiry_queue_key(bytes: &[u8]) -> Result<(i64, GrantKey), StorageError> {
    match bytes.split_first() {
        Some((&EXPIRY_QUEUE_PREFIX, rest)) if rest.len() >= TIME_LEN => {
            let (time, body) = rest.split_at(TIME_LEN);
            let mut raw = [0u8; TIME_LEN];
            raw.copy_from_slice(time);
            Ok((micros_from_sortable(raw), decode_key_body(body)?))
        }
        _ => Err(StorageError::Corrupt(format!(
            "not an expiry queue key: {}",
            hex::encode(bytes)
        ))),
    }
}

/// Smallest key strictly greater than every key starting with `prefix`, if one exists.
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn p(b: u8) -> Principal {
        Principal::from_bytes([b; ADDRESS_LEN])
    }

    #[test]
    fn test_grant_key_decodes_back() {
        let key = GrantKey::new(p(1), p(2), "bank/send");
        let bytes = grant_key_bytes(&key);
        assert!(bytes.starts_with(&pair_prefix(&p(1), &p(2))));
        assert!(bytes.starts_with(&granter_prefix(&p(1))));
        assert_eq!(decode_grant_key(&bytes).unwrap(), key);
    }

    #[test]
    fn test_decode_rejects_foreign_and_short_keys() {
        assert!(decode_grant_key(&[EXPIRY_QUEUE_PREFIX, 1, 2]).is_err());
        assert!(decode_grant_key(&[GRANT_PREFIX, 1, 2]).is_err());
        let mut bad_utf8 = pair_prefix(&p(1), &p(2));
        bad_utf8.push(0xff);
        assert!(matches!(decode_grant_key(&bad_utf8), Err(StorageError::Corrupt(_))));
    }

    #[test]
    fn test_prefix_end() {
        assert_eq!(prefix_end(&[1, 2, 3]), Some(vec![1, 2, 4]));
        assert_eq!(prefix_end(&[1, 0xff, 0xff]), Some(vec![2]));
        assert_eq!(prefix_end(&[0xff, 0xff]), None);
        assert_eq!(prefix_end(&[]), None);
    }

    #[test]
    fn test_expiry_queue_end_includes_now() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let key = GrantKey::new(p(9), p(9), "x");
        let at_now = expiry_queue_key(&now, &key);
        let later = expiry_queue_key(&(now + chrono::Duration::microseconds(1)), &key);
        let end = expiry_queue_end(&now);
        assert!(at_now < end);
        assert!(later >= end);
    }

    #[test]
    fn test_expiry_queue_key_decodes_back() {
        let when = Utc.with_ymd_and_hms(1960, 1, 1, 0, 0, 0).unwrap();
        let key = GrantKey::new(p(3), p(4), "vote");
        let (micros, decoded) = decode_expiry_queue_key(&expiry_queue_key(&when, &key)).unwrap();
        assert_eq!(micros, when.timestamp_micros());
        assert_eq!(decoded, key);
    }

    proptest! {
        #[test]
        fn property_key_bytes_order_matches_key_order(
            g1 in any::<u8>(), e1 in any::<u8>(), a1 in "[a-z/]{0,6}",
            g2 in any::<u8>(), e2 in any::<u8>(), a2 in "[a-z/]{0,6}",
        ) {
            let k1 = GrantKey::new(p(g1), p(e1), a1.as_str());
            let k2 = GrantKey::new(p(g2), p(e2), a2.as_str());
            prop_assert_eq!(k1.cmp(&k2), grant_key_bytes(&k1).cmp(&grant_key_bytes(&k2)));
        }

        #[test]
        fn property_sortable_micros_preserves_order(a in any::<i64>(), b in any::<i64>()) {
            prop_assert_eq!(a.cmp(&b), sortable_micros(a).cmp(&sortable_micros(b)));
            prop_assert_eq!(micros_from_sortable(sortable_micros(a)), a);
        }
    }
}
