//! Error types for the subvolume driver.

use std::path::PathBuf;

use thiserror::Error;

use cowshed_exec::CommandError;

/// Result type alias for driver operations.
pub type BtrfsResult<T> = Result<T, BtrfsError>;

/// Error variants for subvolume and quota-group operations.
#[derive(Debug, Error)]
pub enum BtrfsError {
    /// The underlying tool invocation failed.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// `subvolume show` output did not contain a parseable subvolume ID.
    #[error("subvolume ID not found for {}", .path.display())]
    SubvolumeIdNotFound {
        /// Subvolume path whose ID could not be determined.
        path: PathBuf,
    },

    /// `qgroup show` output had no row for the subvolume's qgroup.
    #[error("qgroup {qgroup} not found for {}", .path.display())]
    QgroupNotFound {
        /// The `0/<subvolume-id>` qgroup that was expected.
        qgroup: String,
        /// Subvolume path the lookup was for.
        path: PathBuf,
    },

    /// A qgroup row matched but its byte columns were not numeric.
    #[error("malformed qgroup row for {}: {row:?}", .path.display())]
    MalformedQgroupRow {
        /// Subvolume path the lookup was for.
        path: PathBuf,
        /// The offending row.
        row: String,
    },

    /// The compression value does not match `algo[:level]` with
    /// algo ∈ {zstd, lzo, zlib} and 1 ≤ level ≤ 15.
    #[error("invalid compression {value:?} (must be zstd, lzo, zlib or none, optionally algo:1..15)")]
    InvalidCompression {
        /// The rejected value.
        value: String,
    },
}
