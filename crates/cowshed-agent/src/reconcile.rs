//! Export reconciler: diffs the live export table against metadata.
//!
//! Orphaned exports (path gone from disk) are withdrawn; exports declared
//! in metadata but missing from the live table are re-added.
//! Reconciliation is level-triggered: per-item failures are logged and
//! retried on the next tick, with no cross-tick state.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cowshed_meta::MetaStore;
use cowshed_nfs::Exporter;

use crate::engine::{METADATA_FILE, SNAPSHOTS_DIR};
use crate::metrics::AgentMetrics;
use crate::model::VolumeRecord;

/// Outcome of one reconciliation pass, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportScanSummary {
    /// Live exports under the tenant prefix.
    pub exports: usize,
    /// Orphaned paths whose exports were withdrawn.
    pub removed: usize,
    /// Missing exports that were re-added from metadata.
    pub restored: usize,
}

/// Per-tenant periodic export reconciler.
pub struct ExportReconciler {
    tenant: String,
    tenant_path: PathBuf,
    exporter: Arc<dyn Exporter>,
    meta: MetaStore,
    metrics: Arc<AgentMetrics>,
}

impl ExportReconciler {
    /// Creates a reconciler for one tenant directory.
    pub fn new(
        tenant: String,
        tenant_path: PathBuf,
        exporter: Arc<dyn Exporter>,
        meta: MetaStore,
        metrics: Arc<AgentMetrics>,
    ) -> Self {
        Self {
            tenant,
            tenant_path,
            exporter,
            meta,
            metrics,
        }
    }

    /// Spawns the worker loop: one pass immediately, then one per
    /// interval until `shutdown` is cancelled.
    pub fn spawn(self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(interval, shutdown).await })
    }

    async fn run(self, interval: Duration, shutdown: CancellationToken) {
        info!(
            tenant = %self.tenant,
            interval_secs = interval.as_secs(),
            "export reconciler started"
        );
        self.scan().await;

        let mut tick = tokio::time::interval(interval);
        tick.tick().await; // the immediate first tick; the pass above covered it
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.scan().await;
                }
                _ = shutdown.cancelled() => {
                    info!(tenant = %self.tenant, "export reconciler stopped");
                    break;
                }
            }
        }
    }

    /// Runs a single reconciliation pass.
    pub async fn scan(&self) -> ExportScanSummary {
        let mut summary = ExportScanSummary::default();
        debug!(tenant = %self.tenant, "export reconciliation starting");

        let exports = match self.exporter.list_exports().await {
            Ok(exports) => exports,
            Err(err) => {
                error!(tenant = %self.tenant, error = %err, "export reconciler: failed to list exports");
                return summary;
            }
        };

        // live state: path -> set of clients, scoped to this tenant
        let prefix = format!("{}/", self.tenant_path.display());
        let mut live: HashMap<String, HashSet<String>> = HashMap::new();
        for export in exports {
            if !export.path.starts_with(&prefix) {
                continue;
            }
            summary.exports += 1;
            live.entry(export.path).or_default().insert(export.client);
        }
        self.metrics.set_exports(&self.tenant, summary.exports as f64);

        // withdraw orphaned exports (path no longer exists on disk)
        for path in live.keys() {
            if Path::new(path).exists() {
                continue;
            }
            warn!(%path, "export reconciler: removing orphaned export");
            match self.exporter.unexport(path, "").await {
                Ok(()) => summary.removed += 1,
                Err(err) => {
                    error!(%path, error = %err, "export reconciler: failed to remove export");
                }
            }
        }

        // re-add exports declared in metadata but missing from the table
        let entries = match std::fs::read_dir(&self.tenant_path) {
            Ok(entries) => entries,
            Err(err) => {
                error!(tenant = %self.tenant, error = %err, "export reconciler: failed to read tenant directory");
                return summary;
            }
        };
        for entry in entries.flatten() {
            if entry.file_name() == SNAPSHOTS_DIR
                || !entry.file_type().map(|t| t.is_dir()).unwrap_or(false)
            {
                continue;
            }
            let vol_dir = entry.path();
            let meta: VolumeRecord = match self.meta.read(&vol_dir.join(METADATA_FILE)) {
                Ok(meta) => meta,
                Err(_) => continue,
            };

            let vol_path = vol_dir.to_string_lossy().into_owned();
            let live_clients = live.get(&vol_path);
            for client in &meta.clients {
                if live_clients.is_some_and(|clients| clients.contains(client)) {
                    continue;
                }
                warn!(path = %vol_path, %client, "export reconciler: restoring missing export");
                match self.exporter.export(&vol_path, client).await {
                    Ok(()) => summary.restored += 1,
                    Err(err) => {
                        error!(path = %vol_path, %client, error = %err,
                               "export reconciler: failed to restore export");
                    }
                }
            }
        }

        if summary.removed > 0 || summary.restored > 0 {
            info!(
                tenant = %self.tenant,
                removed = summary.removed,
                restored = summary.restored,
                "export reconciliation complete"
            );
        }
        summary
    }
}
