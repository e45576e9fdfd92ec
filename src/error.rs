//! Error types for Semantra.
//!
//! Every fallible operation in the crate returns [`Result<T>`], whose error is
//! the [`SemantraError`] enum. The variants map onto a small taxonomy that
//! callers can match on through [`SemantraError::kind`]:
//!
//! - [`ErrorKind::AlreadyExists`]: create on a live collection
//! - [`ErrorKind::NotFound`]: absent collection, point or index configuration
//! - [`ErrorKind::DimensionMismatch`]: vector length disagrees with the collection
//! - [`ErrorKind::IntegrityGap`]: vector store and payload store disagree
//! - [`ErrorKind::InvalidArgument`]: malformed input
//! - [`ErrorKind::BackendFailure`]: key-value store, disk or encoder failure
//!
//! # Examples
//!
//! ```
//! use semantra::error::{ErrorKind, Result, SemantraError};
//!
//! fn lookup() -> Result<()> {
//!     Err(SemantraError::not_found("collection 'docs'"))
//! }
//!
//! let err = lookup().unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::NotFound);
//! ```

use std::io;

use thiserror::Error;

/// The main error type for Semantra operations.
#[derive(Error, Debug)]
pub enum SemantraError {
    /// A collection or index with this name is already live.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The collection, point or index configuration does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A vector does not have the collection's dimension.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A point id is resolvable in one store but not the other.
    #[error("Integrity gap: {0}")]
    IntegrityGap(String),

    /// The key-value store, encoder or index structure failed.
    #[error("Backend failure: {0}")]
    BackendFailure(String),

    /// The caller supplied malformed input.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O errors (artifact files, file-backed key-value store).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary (de)serialization errors for on-disk artifacts.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for operations that may fail with SemantraError.
pub type Result<T> = std::result::Result<T, SemantraError>;

/// Copyable discriminant of [`SemantraError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AlreadyExists,
    NotFound,
    DimensionMismatch,
    IntegrityGap,
    InvalidArgument,
    BackendFailure,
}

impl SemantraError {
    /// Create a new already-exists error.
    pub fn already_exists<S: Into<String>>(msg: S) -> Self {
        SemantraError::AlreadyExists(msg.into())
    }

    /// Create a new not-found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        SemantraError::NotFound(msg.into())
    }

    /// Create a new dimension mismatch error.
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        SemantraError::DimensionMismatch { expected, actual }
    }

    /// Create a new integrity gap error.
    pub fn integrity_gap<S: Into<String>>(msg: S) -> Self {
        SemantraError::IntegrityGap(msg.into())
    }

    /// Create a new backend failure error.
    pub fn backend<S: Into<String>>(msg: S) -> Self {
        SemantraError::BackendFailure(msg.into())
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        SemantraError::InvalidArgument(msg.into())
    }

    /// Create a new serialization error.
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        SemantraError::Serialization(msg.into())
    }

    /// Classify this error.
    ///
    /// I/O, JSON and serialization failures all originate outside the core
    /// and are reported as [`ErrorKind::BackendFailure`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            SemantraError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            SemantraError::NotFound(_) => ErrorKind::NotFound,
            SemantraError::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            SemantraError::IntegrityGap(_) => ErrorKind::IntegrityGap,
            SemantraError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            SemantraError::BackendFailure(_)
            | SemantraError::Io(_)
            | SemantraError::Json(_)
            | SemantraError::Serialization(_) => ErrorKind::BackendFailure,
        }
    }

    /// Whether this error originates outside the core.
    pub fn is_backend_failure(&self) -> bool {
        self.kind() == ErrorKind::BackendFailure
    }
}

impl From<bincode::Error> for SemantraError {
    fn from(err: bincode::Error) -> Self {
        SemantraError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for SemantraError {
    fn from(err: reqwest::Error) -> Self {
        SemantraError::BackendFailure(format!("encoding service request failed: {err}"))
    }
}
