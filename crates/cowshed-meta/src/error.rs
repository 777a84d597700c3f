//! Error types for the metadata store.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for metadata operations.
pub type MetaResult<T> = Result<T, MetaError>;

/// Error variants for metadata document I/O.
#[derive(Debug, Error)]
pub enum MetaError {
    /// The document could not be read.
    #[error("read {}: {source}", .path.display())]
    Read {
        /// Document path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The document content is not valid JSON for the expected type.
    #[error("decode {}: {source}", .path.display())]
    Decode {
        /// Document path.
        path: PathBuf,
        /// Underlying decode error.
        source: serde_json::Error,
    },

    /// The value could not be encoded.
    #[error("encode {}: {source}", .path.display())]
    Encode {
        /// Document path.
        path: PathBuf,
        /// Underlying encode error.
        source: serde_json::Error,
    },

    /// The temporary file could not be written or renamed into place.
    #[error("write {}: {source}", .path.display())]
    Write {
        /// Document path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl MetaError {
    /// True when the failure is a missing document rather than corruption
    /// or an I/O fault.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            MetaError::Read { source, .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}
