//! Error types for matrix-vault
//!
//! Four categories reach callers: not found, format, validation, and backend
//! (`Io` / `ObjectStore`). Nothing here is retried or recovered silently.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// matrix-vault error types
#[derive(Error, Debug)]
pub enum Error {
    /// Requested body, sidecar, or artifact does not exist
    #[error("Not found: {location}")]
    NotFound {
        /// Location that was read
        location: String,
    },

    /// Bytes exist but do not decode under the expected format
    #[error("Format error: {0}")]
    Format(String),

    /// Requested column set does not match the stored column set
    #[error("Validation error: {0}")]
    Validation(String),

    /// Metadata is missing a key an operation needs
    #[error("Metadata is missing required key '{0}'")]
    MissingMetadata(String),

    /// Project root or object key could not be interpreted
    #[error("Invalid storage location: {0}")]
    InvalidLocation(String),

    /// Filesystem backend failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Object storage backend failure
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// Arrow error while reshaping an in-memory matrix
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

impl Error {
    /// Build a `NotFound` error for a location.
    pub fn not_found(location: impl Into<String>) -> Self {
        Self::NotFound {
            location: location.into(),
        }
    }

    /// True if the requested object does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True if stored bytes failed to decode.
    #[must_use]
    pub const fn is_format(&self) -> bool {
        matches!(self, Self::Format(_))
    }

    /// True if a column set check failed.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// True if the underlying store failed for reasons outside this crate.
    #[must_use]
    pub const fn is_backend(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ObjectStore(_))
    }
}
