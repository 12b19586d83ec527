//!
//! Defines error types for the grant store.

/// Errors raised while decoding a principal from its text form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    /// The text has no `1` separating the prefix from the payload.
    #[error("missing prefix separator")]
    MissingSeparator,
    /// The prefix is empty or contains characters other than lowercase ASCII letters.
    #[error("invalid address prefix {0:?}")]
    InvalidPrefix(String),
    /// The prefix is well formed but not the one the caller expects.
    #[error("unexpected address prefix: expected {expected:?}, found {found:?}")]
    UnexpectedPrefix { expected: String, found: String },
    /// The payload is not lowercase (or uppercase) hex.
    #[error("invalid address payload: {0}")]
    InvalidPayload(String),
    /// The decoded payload has the wrong number of bytes.
    #[error("invalid address length: expected {expected} bytes, found {found}")]
    InvalidLength { expected: usize, found: usize },
    /// The trailing checksum does not match the prefix and address bytes.
    #[error("address checksum mismatch")]
    ChecksumMismatch,
}

/// Failures of the underlying storage medium.
///
/// These are fatal for the call that observed them; nothing in this crate retries them.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O failure while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    /// A stored key or value could not be decoded.
    #[error("corrupt stored data: {0}")]
    Corrupt(String),
    /// A value could not be encoded for storage.
    #[error("failed to encode value: {0}")]
    Encoding(String),
}

impl StorageError {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        StorageError::Io { context, source }
    }
}

/// Errors surfaced to callers of the store and the query service.
#[derive(Debug, thiserror::Error)]
pub enum GrantError {
    /// No live grant exists for the requested key. A normal negative result.
    #[error("grant not found")]
    NotFound,
    #[error("invalid address: {0}")]
    InvalidAddress(#[from] AddressError),
    #[error("invalid page token: {0}")]
    InvalidPageToken(String),
    /// The caller's cancellation signal fired before the operation completed.
    #[error("operation cancelled")]
    Cancelled,
    #[error("storage failure: {0}")]
    StorageFailure(#[from] StorageError),
    /// A grant was rejected by policy checks before being written.
    #[error("invalid grant: {0}")]
    InvalidGrant(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl GrantError {
    /// Whether this is the expected "nothing there" outcome rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, GrantError::NotFound)
    }
}

pub type Result<T, E = GrantError> = std::result::Result<T, E>;
