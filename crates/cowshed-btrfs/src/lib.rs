#![warn(missing_docs)]

//! Btrfs subvolume driver for the cowshed agent.
//!
//! Thin, testable adapter over btrfs-progs and chattr: subvolume
//! create/delete/snapshot, per-subvolume attributes (no-COW, compression),
//! and quota-group limits and usage. All command execution flows through
//! the injected [`cowshed_exec::Runner`] so the entire surface is covered
//! by tests without touching a real filesystem.

pub mod compression;
pub mod error;
pub mod manager;
pub mod probe;

pub use compression::is_valid_compression;
pub use error::{BtrfsError, BtrfsResult};
pub use manager::{BtrfsManager, QgroupUsage};
pub use probe::{fs_totals, is_btrfs, FsTotals, BTRFS_SUPER_MAGIC};
