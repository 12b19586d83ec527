//! Stored grant values and their validity rules.

use chrono::{DateTime, Utc};

use crate::capability::{Capability, CapabilityBlob};
use crate::error::{GrantError, StorageError};

/// The value stored under a [`crate::GrantKey`].
///
/// Re-granting replaces both fields at once; there is no partial update.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GrantRecord {
    pub capability: CapabilityBlob,
    /// `None` means the grant never expires.
    pub expiration: Option<DateTime<Utc>>,
}

impl GrantRecord {
    pub fn new(capability: CapabilityBlob, expiration: Option<DateTime<Utc>>) -> Self {
        GrantRecord { capability, expiration }
    }

    /// Encodes `capability` without any policy checks.
    pub fn from_capability(capability: &Capability, expiration: Option<DateTime<Utc>>) -> Result<Self, StorageError> {
        Ok(GrantRecord::new(capability.encode()?, expiration))
    }

    /// Builds a record for a new grant, rejecting malformed capabilities and expirations
    /// that are not after `now`.
    pub fn new_checked(
        capability: &Capability,
        expiration: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Self, GrantError> {
        capability.validate()?;
        if let Some(exp) = expiration {
            if exp <= now {
                return Err(GrantError::InvalidGrant(format!(
                    "expiration {exp} is not after {now}"
                )));
            }
        }
        Ok(GrantRecord::from_capability(capability, expiration)?)
    }

    /// A grant is expired once `as_of` reaches its expiration.
    pub fn is_expired(&self, as_of: &DateTime<Utc>) -> bool {
        matches!(self.expiration, Some(exp) if exp <= *as_of)
    }

    pub fn is_live(&self, as_of: &DateTime<Utc>) -> bool {
        !self.is_expired(as_of)
    }

    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>, StorageError> {
        serde_json::to_vec(self).map_err(|e| StorageError::Encoding(e.to_string()))
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        serde_json::from_slice(bytes).map_err(|e| StorageError::Corrupt(format!("undecodable grant record: {e}")))
    }
}

/// A live grant as the query layer hands it out: the decoded capability and its expiration.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Grant {
    pub capability: Capability,
    pub expiration: Option<DateTime<Utc>>,
}

impl TryFrom<&GrantRecord> for Grant {
    type Error = StorageError;

    fn try_from(record: &GrantRecord) -> Result<Self, Self::Error> {
        Ok(Grant {
            capability: record.capability.decode()?,
            expiration: record.expiration,
        })
    }
}
