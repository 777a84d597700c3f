//! Persisted record and request types.
//!
//! The records are the on-disk `metadata.json` documents; field names are
//! part of the format and timestamps are RFC 3339 in UTC.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persistent metadata of one volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeRecord {
    /// Volume name, unique within the tenant.
    pub name: String,
    /// Absolute volume directory (the parent of `data/`).
    pub path: PathBuf,
    /// Provisioned size in bytes. Monotonically non-decreasing.
    pub size_bytes: u64,
    /// Whether the no-COW attribute is set on the data subvolume.
    /// One-way: once set it is never cleared.
    pub nocow: bool,
    /// Compression setting (`""`, `"none"`, or `algo[:level]`).
    pub compression: String,
    /// Qgroup limit in bytes. Never below `size_bytes`.
    pub quota_bytes: u64,
    /// Referenced bytes as last sampled by the usage reconciler.
    #[serde(default)]
    pub used_bytes: u64,
    /// Owning user of the data subvolume.
    pub uid: u32,
    /// Owning group of the data subvolume.
    pub gid: u32,
    /// Permission bits of the data subvolume as an octal string
    /// (e.g. `"2770"`).
    pub mode: String,
    /// Clients this volume is published to. The desired export set; the
    /// live table converges to it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clients: Vec<String>,
    /// Creation time. Never changes.
    pub created_at: DateTime<Utc>,
    /// Time of the last mutation.
    pub updated_at: DateTime<Utc>,
    /// Time of the most recent export call, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attach_at: Option<DateTime<Utc>>,
}

/// Persistent metadata of one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Snapshot name, unique within the tenant.
    pub name: String,
    /// Name of the source volume.
    pub volume: String,
    /// Absolute snapshot directory.
    pub path: PathBuf,
    /// Size of the source volume at creation time.
    pub size_bytes: u64,
    /// Referenced bytes as last sampled by the usage reconciler.
    #[serde(default)]
    pub used_bytes: u64,
    /// Exclusive bytes as last sampled by the usage reconciler.
    #[serde(default)]
    pub exclusive_bytes: u64,
    /// Always true; snapshots are immutable.
    pub readonly: bool,
    /// Creation time. Never changes.
    pub created_at: DateTime<Utc>,
    /// Time of the last mutation (usage drift only).
    pub updated_at: DateTime<Utc>,
}

/// Persistent metadata of one clone: a writable sibling of a volume
/// materialized from a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloneRecord {
    /// Clone name, unique within the tenant.
    pub name: String,
    /// Name of the snapshot the clone was materialized from.
    pub source_snapshot: String,
    /// Absolute clone directory.
    pub path: PathBuf,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// One `(path, client)` pair of the export table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportEntry {
    /// Exported directory.
    pub path: String,
    /// Client the directory is published to.
    pub client: String,
}

/// Filesystem totals of the tenant's backing filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsStats {
    /// Total size in bytes.
    pub total_bytes: u64,
    /// Bytes in use (total minus available).
    pub used_bytes: u64,
    /// Bytes available.
    pub free_bytes: u64,
}

/// Request to create a volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeCreateRequest {
    /// Volume name.
    pub name: String,
    /// Provisioned size in bytes. Required, non-zero.
    pub size_bytes: u64,
    /// Set the no-COW attribute on the data subvolume.
    #[serde(default)]
    pub nocow: bool,
    /// Compression setting. Mutually exclusive with `nocow`.
    #[serde(default)]
    pub compression: String,
    /// Qgroup limit in bytes. Defaults to `size_bytes` when zero.
    #[serde(default)]
    pub quota_bytes: u64,
    /// Owning user for the data subvolume.
    #[serde(default)]
    pub uid: u32,
    /// Owning group for the data subvolume.
    #[serde(default)]
    pub gid: u32,
    /// Permission bits as an octal string. Defaults to the engine's
    /// configured data mode when empty.
    #[serde(default)]
    pub mode: String,
}

/// Partial update of a volume. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeUpdateRequest {
    /// New size in bytes; must be strictly greater than the current size.
    /// Also becomes the new quota.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// Set the no-COW attribute. `false` after the attribute was set is
    /// refused silently.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nocow: Option<bool>,
    /// New compression setting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
    /// New owning user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    /// New owning group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
    /// New permission bits as an octal string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// Request to snapshot a volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotCreateRequest {
    /// Source volume name.
    pub volume: String,
    /// Snapshot name.
    pub name: String,
}

/// Request to clone a snapshot into a writable volume sibling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloneCreateRequest {
    /// Source snapshot name.
    pub snapshot: String,
    /// Clone name.
    pub name: String,
}
