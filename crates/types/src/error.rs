//! Error types for Lattica KeyDir using snafu.
//!
//! One unified error type covers the protocol surface. Variants map onto
//! the wire-level error kinds: client errors (invalid argument, failed
//! authorization, stale previous link), not-found/out-of-range lookups,
//! retryable backend unavailability, and internal invariant violations.

use snafu::{Location, Snafu};

use crate::types::DirectoryId;

/// Unified result type for directory operations.
pub type Result<T, E = KeydirError> = std::result::Result<T, E>;

/// Top-level error type for directory operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum KeydirError {
    /// Malformed request: bad shape, bad index, undecodable entry.
    #[snafu(display("Invalid argument: {message}"))]
    InvalidArgument {
        /// Description of what was malformed.
        message: String,
    },

    /// Mutation signatures do not satisfy the authorization rule.
    #[snafu(display("Unauthorized mutation: {message}"))]
    Unauthorized {
        /// Which signature requirement failed.
        message: String,
    },

    /// The mutation's `previous` digest does not match the current entry.
    ///
    /// The client must refetch the current entry and re-sign.
    #[snafu(display("Previous-entry mismatch: expected {expected}, got {got}"))]
    PreviousMismatch {
        /// Hex digest of the current entry.
        expected: String,
        /// Hex digest the mutation carried.
        got: String,
    },

    /// The supplied commitment opening does not match the entry commitment.
    #[snafu(display("Commitment mismatch"))]
    CommitmentMismatch,

    /// VRF proof failed to verify.
    #[snafu(display("VRF proof invalid: {message}"))]
    Vrf {
        /// Verification failure detail.
        message: String,
    },

    /// Directory does not exist (or is soft-deleted).
    #[snafu(display("Directory {directory_id} not found"))]
    DirectoryNotFound {
        /// The missing directory.
        directory_id: DirectoryId,
    },

    /// No published leaf or history for the requested user/revision.
    #[snafu(display("Not found: {message}"))]
    NotFound {
        /// What was missing.
        message: String,
    },

    /// Requested revision is newer than the latest published revision.
    #[snafu(display("Revision {requested} out of range: latest published is {latest}"))]
    OutOfRange {
        /// Requested revision number.
        requested: u64,
        /// Latest published revision number.
        latest: u64,
    },

    /// Caller deadline expired before the operation completed.
    #[snafu(display("Deadline exceeded"))]
    DeadlineExceeded,

    /// Caller cancelled the operation.
    #[snafu(display("Cancelled"))]
    Cancelled,

    /// Transient backend failure; retry with backoff.
    #[snafu(display("Backend unavailable at {location}: {message}"))]
    Unavailable {
        /// What failed.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// Invariant violation or corrupted proof. Not retryable; operator
    /// attention required.
    #[snafu(display("Internal error at {location}: {message}"))]
    Internal {
        /// Description of the violated invariant.
        message: String,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// Canonical encoding or decoding failed.
    #[snafu(display("Serialization error at {location}: {source}"))]
    Serialization {
        /// The underlying codec error.
        source: crate::codec::CodecError,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// Configuration rejected at validation time.
    #[snafu(display("Configuration error: {message}"))]
    Config {
        /// The validation failure.
        message: String,
    },
}

impl KeydirError {
    /// Whether a caller may retry the failed operation as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KeydirError::Unavailable { .. } | KeydirError::OutOfRange { .. })
    }

    /// Shorthand for an [`KeydirError::InvalidArgument`].
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        KeydirError::InvalidArgument { message: message.into() }
    }

    /// Shorthand for a [`KeydirError::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        KeydirError::NotFound { message: message.into() }
    }
}
