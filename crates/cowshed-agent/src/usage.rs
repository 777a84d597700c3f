//! Usage reconciler: samples qgroup usage and on-disk ownership for every
//! volume and snapshot and writes drift back into metadata.
//!
//! Nodes reach the data subvolumes over NFS and may chown/chmod them
//! behind the agent's back, so the scan treats the filesystem as the
//! source of truth for uid/gid/mode and the qgroup as the source of truth
//! for usage. The reconciler never creates or deletes metadata; a failure
//! on one entry skips that entry only.

use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cowshed_btrfs::BtrfsManager;
use cowshed_meta::MetaStore;

use crate::engine::{DATA_DIR, METADATA_FILE, SNAPSHOTS_DIR};
use crate::metrics::AgentMetrics;
use crate::model::{SnapshotRecord, VolumeRecord};
use crate::validate::mode_string;

/// Outcome of one usage scan, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageScanSummary {
    /// Volumes with readable metadata that were examined.
    pub volumes: usize,
    /// Volumes whose metadata was rewritten.
    pub updated: usize,
    /// Volumes skipped because of a stat/qgroup/write failure.
    pub failed: usize,
    /// Snapshots whose metadata was rewritten.
    pub snapshots_updated: usize,
    /// Snapshots skipped because of a qgroup/write failure.
    pub snapshots_failed: usize,
}

/// Per-tenant periodic usage sampler.
pub struct UsageReconciler {
    tenant: String,
    tenant_path: PathBuf,
    btrfs: BtrfsManager,
    meta: MetaStore,
    metrics: Arc<AgentMetrics>,
    quota_enabled: bool,
}

impl UsageReconciler {
    /// Creates a reconciler for one tenant directory.
    pub fn new(
        tenant: String,
        tenant_path: PathBuf,
        btrfs: BtrfsManager,
        meta: MetaStore,
        metrics: Arc<AgentMetrics>,
        quota_enabled: bool,
    ) -> Self {
        Self {
            tenant,
            tenant_path,
            btrfs,
            meta,
            metrics,
            quota_enabled,
        }
    }

    /// Spawns the worker loop: one scan immediately, then one per
    /// interval until `shutdown` is cancelled.
    pub fn spawn(self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(interval, shutdown).await })
    }

    async fn run(self, interval: Duration, shutdown: CancellationToken) {
        info!(
            tenant = %self.tenant,
            interval_secs = interval.as_secs(),
            "usage reconciler started"
        );
        self.scan().await;

        let mut tick = tokio::time::interval(interval);
        tick.tick().await; // the immediate first tick; the scan above covered it
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.scan().await;
                }
                _ = shutdown.cancelled() => {
                    info!(tenant = %self.tenant, "usage reconciler stopped");
                    break;
                }
            }
        }
    }

    /// Runs a single scan over the tenant's volumes and snapshots.
    pub async fn scan(&self) -> UsageScanSummary {
        let mut summary = UsageScanSummary::default();
        debug!(tenant = %self.tenant, "usage scan starting");

        let entries = match std::fs::read_dir(&self.tenant_path) {
            Ok(entries) => entries,
            Err(err) => {
                error!(tenant = %self.tenant, error = %err, "usage scan: failed to read tenant directory");
                return summary;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == SNAPSHOTS_DIR || !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }

            let meta_path = entry.path().join(METADATA_FILE);
            let data_dir = entry.path().join(DATA_DIR);

            let meta: VolumeRecord = match self.meta.read(&meta_path) {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            summary.volumes += 1;

            // ownership/mode drift (nodes may chown/chmod over NFS)
            let stat = match std::fs::metadata(&data_dir) {
                Ok(stat) => stat,
                Err(err) => {
                    warn!(volume = %name, error = %err, "usage scan: stat failed, skipping volume");
                    summary.failed += 1;
                    continue;
                }
            };
            let fs_uid = stat.uid();
            let fs_gid = stat.gid();
            let fs_mode = mode_string(stat.mode());
            let mut changed =
                fs_uid != meta.uid || fs_gid != meta.gid || fs_mode != meta.mode;

            self.metrics
                .set_volume_size(&self.tenant, &name, meta.quota_bytes as f64);
            self.metrics
                .set_volume_used(&self.tenant, &name, meta.used_bytes as f64);

            // usage drift
            let mut used = meta.used_bytes;
            if self.quota_enabled && meta.quota_bytes > 0 {
                match self.btrfs.qgroup_usage(&data_dir).await {
                    Ok(referenced) => {
                        used = referenced;
                        if used != meta.used_bytes {
                            changed = true;
                        }
                    }
                    Err(err) => {
                        warn!(
                            volume = %name, error = %err,
                            "usage scan: qgroup query failed, skipping volume - if this persists check your quotas"
                        );
                        summary.failed += 1;
                        continue;
                    }
                }
            }

            if !changed {
                continue;
            }

            debug!(
                volume = %name,
                uid = fs_uid,
                gid = fs_gid,
                mode = %fs_mode,
                used_bytes = used,
                "usage scan: updating metadata"
            );
            let result = self.meta.update(&meta_path, |meta: &mut VolumeRecord| {
                meta.uid = fs_uid;
                meta.gid = fs_gid;
                meta.mode = fs_mode;
                meta.used_bytes = used;
                meta.updated_at = Utc::now();
            });
            match result {
                Ok(_) => summary.updated += 1,
                Err(err) => {
                    error!(volume = %name, error = %err, "usage scan: failed to write metadata");
                    summary.failed += 1;
                }
            }
        }

        self.metrics.set_volumes(&self.tenant, summary.volumes as f64);
        info!(
            tenant = %self.tenant,
            volumes = summary.volumes,
            updated = summary.updated,
            failed = summary.failed,
            "usage scan: volume pass complete"
        );

        self.scan_snapshots(&mut summary).await;
        summary
    }

    async fn scan_snapshots(&self, summary: &mut UsageScanSummary) {
        let snap_base = self.tenant_path.join(SNAPSHOTS_DIR);
        let entries = match std::fs::read_dir(&snap_base) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }

            let meta_path = entry.path().join(METADATA_FILE);
            let data_dir = entry.path().join(DATA_DIR);

            let meta: SnapshotRecord = match self.meta.read(&meta_path) {
                Ok(meta) => meta,
                Err(_) => continue,
            };

            let usage = match self.btrfs.qgroup_usage_ex(&data_dir).await {
                Ok(usage) => usage,
                Err(err) => {
                    // snapshot qgroups routinely lag right after creation;
                    // keep this quiet relative to the volume pass
                    debug!(snapshot = %name, error = %err, "usage scan: snapshot qgroup query failed");
                    summary.snapshots_failed += 1;
                    continue;
                }
            };

            if usage.referenced == meta.used_bytes && usage.exclusive == meta.exclusive_bytes {
                continue;
            }

            let result = self.meta.update(&meta_path, |meta: &mut SnapshotRecord| {
                meta.used_bytes = usage.referenced;
                meta.exclusive_bytes = usage.exclusive;
                meta.updated_at = Utc::now();
            });
            match result {
                Ok(_) => summary.snapshots_updated += 1,
                Err(err) => {
                    error!(snapshot = %name, error = %err, "usage scan: failed to write snapshot metadata");
                    summary.snapshots_failed += 1;
                }
            }
        }

        if summary.snapshots_updated > 0 || summary.snapshots_failed > 0 {
            info!(
                tenant = %self.tenant,
                updated = summary.snapshots_updated,
                failed = summary.snapshots_failed,
                "usage scan: snapshot pass complete"
            );
        }
    }
}
