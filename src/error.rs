//! Error types for the segrank library.
//!
//! All fallible operations return [`SegrankError`] through the crate-wide
//! [`Result`] alias. Each variant maps to one failure class of the rank
//! engine so callers can decide whether to retry, rebuild, or give up.
//!
//! # Examples
//!
//! ```
//! use segrank::error::{Result, SegrankError};
//!
//! fn lookup() -> Result<()> {
//!     Err(SegrankError::not_found("member 42"))
//! }
//!
//! match lookup() {
//!     Err(SegrankError::NotFound(member)) => assert_eq!(member, "member 42"),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use std::io;

use thiserror::Error;

/// The main error type for segrank operations.
#[derive(Error, Debug)]
pub enum SegrankError {
    /// Invalid domain or partition parameters.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A score outside the domain the index was built for.
    #[error("Domain violation: score {score} is outside [{min}, {max}]")]
    DomainViolation { score: f64, min: i64, max: i64 },

    /// The member has no score in any collaborator.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A self-check found a negative counter or a broken sum.
    #[error("Index corruption: {0}")]
    IndexCorruption(String),

    /// A required call to an external store failed.
    #[error("Store unavailable ({store}): {reason}")]
    StoreUnavailable { store: String, reason: String },

    /// The score write committed but the index update did not.
    #[error("Index left stale for member {member}: {reason}")]
    StaleIndex { member: String, reason: String },

    /// I/O errors (journal, snapshot files)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed snapshot or journal bytes.
    #[error("Codec error: {0}")]
    Codec(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A collaborator does not implement an optional operation.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),

    /// Generic anyhow error
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with SegrankError.
pub type Result<T> = std::result::Result<T, SegrankError>;

impl SegrankError {
    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        SegrankError::Config(msg.into())
    }

    /// Create a new domain violation error.
    pub fn domain_violation(score: f64, min: i64, max: i64) -> Self {
        SegrankError::DomainViolation { score, min, max }
    }

    /// Create a new not found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        SegrankError::NotFound(msg.into())
    }

    /// Create a new index corruption error.
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        SegrankError::IndexCorruption(msg.into())
    }

    /// Create a new store unavailable error.
    pub fn store_unavailable<S: Into<String>, R: Into<String>>(store: S, reason: R) -> Self {
        SegrankError::StoreUnavailable {
            store: store.into(),
            reason: reason.into(),
        }
    }

    /// Create a new stale index error.
    pub fn stale_index<S: Into<String>, R: Into<String>>(member: S, reason: R) -> Self {
        SegrankError::StaleIndex {
            member: member.into(),
            reason: reason.into(),
        }
    }

    /// Create a new codec error.
    pub fn codec<S: Into<String>>(msg: S) -> Self {
        SegrankError::Codec(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        SegrankError::Other(msg.into())
    }

    /// Create an error for an operation a collaborator does not provide.
    pub fn unsupported<S: Into<String>>(operation: S) -> Self {
        SegrankError::Unsupported(operation.into())
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        SegrankError::Other(format!("Invalid argument: {}", msg.into()))
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Domain and configuration errors indicate caller bugs and are never
    /// retriable.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            SegrankError::StoreUnavailable { .. } | SegrankError::Io(_)
        )
    }

    /// Wrap a failure from an external collaborator, keeping domain errors intact.
    ///
    /// Errors that already carry engine semantics pass through unchanged so a
    /// caller bug is never reported as an outage.
    pub fn into_store_error(self, store: &str) -> Self {
        match self {
            SegrankError::StoreUnavailable { .. }
            | SegrankError::DomainViolation { .. }
            | SegrankError::Config(_)
            | SegrankError::Unsupported(_)
            | SegrankError::NotFound(_) => self,
            other => SegrankError::store_unavailable(store, other.to_string()),
        }
    }
}
