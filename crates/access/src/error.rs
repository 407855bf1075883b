//! Error types for the access crate.

use thiserror::Error;

/// Coarse classification shared by every error surfaced to transports.
///
/// Transports map a kind onto their own status vocabulary; the concrete
/// error carries the detail that only ends up in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Structurally invalid input.
    Malformed,
    /// Time-based rejection.
    Expired,
    /// Scope or confinement violation.
    NoPermission,
    /// Missing file, or unknown/consumed ticket.
    NotFound,
    /// Destination already exists.
    Conflict,
    /// Cooperative abort.
    Canceled,
    /// Underlying storage failure.
    Io,
    /// Data-integrity violation (short write, checksum mismatch).
    Integrity,
}

/// Access-control error covering token, ticket and confinement failures.
#[derive(Debug, Error)]
pub enum AccessError {
    /// Token or ticket could not be parsed, or its signature did not verify.
    #[error("malformed: {0}")]
    Malformed(String),

    /// Token or ticket is past its expiry.
    #[error("expired at {expired_at}")]
    Expired {
        /// Unix timestamp the credential expired at.
        expired_at: i64,
    },

    /// Scope string is not three permission letters or disable markers.
    #[error("invalid scope: {0:?}")]
    InvalidScope(String),

    /// Directory escapes the public root.
    #[error("invalid permission directory: {0}")]
    InvalidDirectory(String),

    /// Token lifetime must be positive.
    #[error("invalid expiration period: {0} minutes")]
    InvalidLifetime(i64),

    /// Scope bit disabled or target outside the granted directory.
    #[error("{0}")]
    NoPermission(String),

    /// Ticket never issued or already redeemed.
    #[error("signed key not found")]
    NotFound,

    /// Authenticated decryption rejected the ticket.
    #[error("signed key could not be decrypted")]
    DecryptFailed,

    /// Decrypted ticket does not match the checksum recorded at issuance.
    #[error("signed key checksum mismatch")]
    ChecksumMismatch,

    /// Decrypted ticket does not carry the expected fields.
    #[error("malformed ticket metadata")]
    MalformedMetadata,

    /// Key material has the wrong shape.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Sealing a ticket failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Lock poisoned during operation.
    #[error("lock poisoned: {context}")]
    LockPoisoned {
        /// Operation that observed the poisoned lock.
        context: String,
    },
}

impl AccessError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AccessError::Malformed(_)
            | AccessError::InvalidScope(_)
            | AccessError::InvalidDirectory(_)
            | AccessError::InvalidLifetime(_)
            | AccessError::DecryptFailed
            | AccessError::MalformedMetadata => ErrorKind::Malformed,
            AccessError::Expired { .. } => ErrorKind::Expired,
            AccessError::NoPermission(_) => ErrorKind::NoPermission,
            AccessError::NotFound => ErrorKind::NotFound,
            AccessError::ChecksumMismatch => ErrorKind::Integrity,
            AccessError::InvalidKey(_)
            | AccessError::Encryption(_)
            | AccessError::LockPoisoned { .. } => ErrorKind::Io,
        }
    }
}

/// Result type alias for access operations.
pub type Result<T> = std::result::Result<T, AccessError>;
