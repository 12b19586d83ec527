//!
//! Capability descriptors: what a grantee is allowed to do under a grant.
//!
//! The set of kinds is closed and known to the query layer. The store never looks inside
//! a descriptor; it only keeps the encoded [`CapabilityBlob`].

use std::collections::BTreeSet;

use crate::error::{GrantError, StorageError};
use crate::primitives::ActionType;

/// An amount of one denomination.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: u64,
}

impl Coin {
    pub fn new(denom: impl Into<String>, amount: u64) -> Self {
        Coin { denom: denom.into(), amount }
    }
}

/// The kinds of capability a granter can delegate.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Capability {
    /// Unconditional permission to perform one action type.
    Generic { action_type: ActionType },
    /// Permission to spend up to `limit` in total, one cap per denomination.
    SpendLimit { limit: Vec<Coin> },
    /// Permission to perform an action type at most `remaining` more times.
    CountLimit { action_type: ActionType, remaining: u32 },
}

impl Capability {
    pub fn generic(action_type: impl Into<ActionType>) -> Self {
        Capability::Generic { action_type: action_type.into() }
    }

    /// The action type this descriptor is tied to, if it names one.
    pub fn bound_action_type(&self) -> Option<&ActionType> {
        match self {
            Capability::Generic { action_type } | Capability::CountLimit { action_type, .. } => Some(action_type),
            Capability::SpendLimit { .. } => None,
        }
    }

    /// Checks the descriptor is well formed before it is written.
    pub fn validate(&self) -> Result<(), GrantError> {
        match self {
            Capability::Generic { action_type } => {
                if action_type.is_empty() {
                    return Err(GrantError::InvalidGrant("generic capability has an empty action type".into()));
                }
            }
            Capability::SpendLimit { limit } => {
                if limit.is_empty() {
                    return Err(GrantError::InvalidGrant("spend limit cannot be empty".into()));
                }
                let mut seen = BTreeSet::new();
                for coin in limit {
                    if coin.denom.is_empty() {
                        return Err(GrantError::InvalidGrant("spend limit has an empty denomination".into()));
                    }
                    if coin.amount == 0 {
                        return Err(GrantError::InvalidGrant(format!(
                            "spend limit for {} must be positive",
                            coin.denom
                        )));
                    }
                    if !seen.insert(coin.denom.as_str()) {
                        return Err(GrantError::InvalidGrant(format!(
                            "duplicate denomination {} in spend limit",
                            coin.denom
                        )));
                    }
                }
            }
            Capability::CountLimit { action_type, remaining } => {
                if action_type.is_empty() {
                    return Err(GrantError::InvalidGrant("count limit has an empty action type".into()));
                }
                if *remaining == 0 {
                    return Err(GrantError::InvalidGrant("count limit must allow at least one use".into()));
                }
            }
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<CapabilityBlob, StorageError> {
        serde_json::to_vec(self)
            .map(CapabilityBlob)
            .map_err(|e| StorageError::Encoding(e.to_string()))
    }
}

/// Encoded capability as the store keeps it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct CapabilityBlob(#[serde(with = "serde_bytes")] pub Vec<u8>);

impl CapabilityBlob {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn decode(&self) -> Result<Capability, StorageError> {
        serde_json::from_slice(&self.0)
            .map_err(|e| StorageError::Corrupt(format!("undecodable capability: {e}")))
    }
}
