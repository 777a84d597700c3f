#![warn(missing_docs)]

//! Cowshed storage agent core.
//!
//! The agent owns a base directory on a btrfs filesystem and provisions
//! copy-on-write volumes, snapshots, and clones underneath it, one tenant
//! per subdirectory. Each resource directory holds a `metadata.json` next
//! to a `data/` subvolume so metadata can be rewritten atomically without
//! touching the subvolume itself. Volumes are published to remote clients
//! through the kernel NFS server's export table.
//!
//! Three sources of truth — on-disk metadata, subvolume state, and the
//! export table — cannot be updated transactionally across process
//! boundaries. The engine picks a write order per operation so that a
//! crash between steps is recoverable, and two background reconcilers
//! ([`usage::UsageReconciler`], [`reconcile::ExportReconciler`]) drive the
//! observed state back toward the declared state on a fixed interval.
//!
//! Operations are cancellable by dropping their futures; in-flight
//! external commands are killed on drop.

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod model;
pub mod reconcile;
pub mod usage;

mod validate;

pub use config::AgentConfig;
pub use engine::{StorageAgent, DATA_DIR, METADATA_FILE, SNAPSHOTS_DIR};
pub use error::{AgentError, AgentResult, ConflictRecord, ErrorCode};
pub use metrics::{AgentMetrics, Metric, MetricType, MetricValue};
pub use model::{
    CloneCreateRequest, CloneRecord, ExportEntry, FsStats, SnapshotCreateRequest, SnapshotRecord,
    VolumeCreateRequest, VolumeRecord, VolumeUpdateRequest,
};
pub use reconcile::{ExportReconciler, ExportScanSummary};
pub use usage::{UsageReconciler, UsageScanSummary};
