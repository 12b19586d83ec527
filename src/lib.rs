#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![deny(deprecated)]

//!
//! Grant-Store keeps authorization grants: capabilities one account has delegated to
//! another, scoped to an action type and optionally expiring.
//!
//! The crate is split into a dumb keyed store ([`store`]) that never interprets time or
//! capability contents, and a query layer ([`query`]) that hides expired grants and
//! assembles pages. Expired grants are removed lazily by [`sweep`].

// Account addresses, action types and grant keys.
pub mod primitives;

pub use primitives::*;

// Byte layout of stored keys.
pub mod keys;

// Capability descriptors and their encoded form.
pub mod capability;

// Stored grant values and validity rules.
pub mod record;

// Error types.
pub mod error;

pub mod cancel;
pub mod config;
pub mod cursor;

// Storage backends and the grant store.
pub mod store;

// Expiration-aware reads.
pub mod query;

// Expired-grant cleanup.
pub mod sweep;

#[cfg(feature = "tracing-subscriber")]
pub mod telemetry;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use cancel::{CancelFlag, Cancellation, Deadline, NeverCancel};
pub use capability::{Capability, CapabilityBlob, Coin};
pub use config::StoreConfig;
pub use error::{AddressError, GrantError, StorageError};
pub use query::{Page, PageRequest, PageToken, QueryService};
pub use record::{Grant, GrantRecord};
pub use store::{FileBackend, GrantStore, KvBackend, MemoryBackend};
pub use sweep::{sweep_expired, SweepReport, Sweeper};
