//! Error handling for survey table assembly.
//!
//! Fetch failures carry a [`FetchReason`] so callers can tell transient network
//! trouble apart from structural problems with a codebook.

use std::fmt;
use std::path::PathBuf;

use arrow::error::ArrowError;

/// Why a codebook or mortality fetch failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchReason {
    /// The remote resource does not exist (or answered with an error status)
    NotFound,
    /// The request timed out or the connection could not be made
    Timeout,
    /// The payload has no `SEQN` column
    NoKeyColumn,
    /// `SEQN` repeats within a single codebook
    DuplicateKey,
    /// A value cannot be represented in the target numeric type
    Overflow,
    /// The codebook name matches the configured deny-list
    Excluded,
    /// The single retry failed as well
    RetryFailed,
    /// The payload could not be decoded
    Malformed,
}

impl FetchReason {
    /// Whether a failure with this reason is worth one more attempt
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::NotFound | Self::Timeout)
    }
}

impl fmt::Display for FetchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not found",
            Self::Timeout => "timed out",
            Self::NoKeyColumn => "no key column",
            Self::DuplicateKey => "duplicate key",
            Self::Overflow => "overflow",
            Self::Excluded => "excluded",
            Self::RetryFailed => "retry failed",
            Self::Malformed => "malformed payload",
        };
        f.write_str(name)
    }
}

/// A failed fetch of one codebook or mortality file
#[derive(Debug, thiserror::Error)]
#[error("{reason}: {message} - {location}")]
pub struct FetchError {
    /// Classified cause
    pub reason: FetchReason,
    /// Source location that was attempted
    pub location: String,
    /// Human readable detail
    pub message: String,
    /// Failure of the previous attempt, set for [`FetchReason::RetryFailed`]
    #[source]
    pub source: Option<Box<FetchError>>,
}

impl FetchError {
    pub fn new(reason: FetchReason, location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            reason,
            location: location.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Wrap the failure of a second attempt
    #[must_use]
    pub fn retry_failed(last: Self) -> Self {
        Self {
            reason: FetchReason::RetryFailed,
            location: last.location.clone(),
            message: "failed during retry of download".to_string(),
            source: Some(Box::new(last)),
        }
    }
}

/// Errors raised while combining tables
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// A table entering a column-wise join repeats a subject key
    #[error("Subject key {key} repeats within input table {table}")]
    DuplicateKey { table: usize, key: i64 },

    /// The same column name appears on both sides of a join
    #[error("Column {column} is present in more than one joined table")]
    ColumnCollision { column: String },

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),
}

/// Errors raised by the on-disk cache
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// No snapshot exists at the location
    #[error("No cached table at {}", .0.display())]
    Missing(PathBuf),

    /// Reading or writing the snapshot failed
    #[error("Cache IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The snapshot could not be encoded or decoded
    #[error("Cache format error at {}: {source}", path.display())]
    Arrow {
        path: PathBuf,
        #[source]
        source: ArrowError,
    },

    /// The schema recorded beside the snapshot could not be encoded or decoded
    #[error("Cache schema error at {}: {source}", path.display())]
    Schema {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The snapshot lacks the subject key column
    #[error("Cached table at {} has no SEQN column", .0.display())]
    NoKeyColumn(PathBuf),
}

/// Crate-wide error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Arrow error outside of merging or caching
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// The fetch reason, when this is a fetch failure
    #[must_use]
    pub const fn fetch_reason(&self) -> Option<FetchReason> {
        match self {
            Self::Fetch(e) => Some(e.reason),
            _ => None,
        }
    }
}

/// Result type for survey operations
pub type Result<T> = std::result::Result<T, Error>;
