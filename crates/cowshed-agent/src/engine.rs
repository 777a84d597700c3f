//! The storage engine: volume, snapshot, clone, and export lifecycle.
//!
//! The engine owns the on-disk layout
//!
//! ```text
//! <base>/<tenant>/<volume>/{metadata.json, data/}
//! <base>/<tenant>/snapshots/<snapshot>/{metadata.json, data/}
//! ```
//!
//! where `data/` is the subvolume and the parent directory holds the
//! metadata document. Creates build the subvolume before writing metadata
//! (an orphan subvolume is inspectable; a ghost record is not) and roll
//! back on partial failure. Exports write metadata before touching the
//! export table so the export reconciler can always converge from
//! metadata after a crash.

use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use cowshed_btrfs::{is_valid_compression, BtrfsManager};
use cowshed_exec::Runner;
use cowshed_meta::MetaStore;
use cowshed_nfs::Exporter;

use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult, ConflictRecord};
use crate::metrics::AgentMetrics;
use crate::model::{
    CloneCreateRequest, CloneRecord, ExportEntry, FsStats, SnapshotCreateRequest, SnapshotRecord,
    VolumeCreateRequest, VolumeRecord, VolumeUpdateRequest,
};
use crate::reconcile::ExportReconciler;
use crate::usage::UsageReconciler;
use crate::validate::{parse_mode, validate_name};

/// Name of the per-resource metadata document.
pub const METADATA_FILE: &str = "metadata.json";
/// Name of the subvolume child inside each resource directory.
pub const DATA_DIR: &str = "data";
/// Name of the per-tenant snapshot directory.
pub const SNAPSHOTS_DIR: &str = "snapshots";

/// Node-local storage engine over btrfs subvolumes and NFS exports.
pub struct StorageAgent {
    base_path: PathBuf,
    quota_enabled: bool,
    tenants: Vec<String>,
    default_dir_mode: u32,
    default_data_mode: String,
    btrfs: BtrfsManager,
    exporter: Arc<dyn Exporter>,
    meta: MetaStore,
    metrics: Arc<AgentMetrics>,
}

impl std::fmt::Debug for StorageAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageAgent")
            .field("base_path", &self.base_path)
            .field("quota_enabled", &self.quota_enabled)
            .field("tenants", &self.tenants)
            .field("default_dir_mode", &self.default_dir_mode)
            .field("default_data_mode", &self.default_data_mode)
            .field("btrfs", &self.btrfs)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

impl StorageAgent {
    /// Builds the engine and verifies the environment.
    ///
    /// Checks that the base path is a directory on btrfs, that the btrfs
    /// tooling runs, and that quota accounting is active when enabled;
    /// then provisions every configured tenant directory. Any failure
    /// here is fatal for the agent.
    pub async fn new(
        config: AgentConfig,
        runner: Arc<dyn Runner>,
        exporter: Arc<dyn Exporter>,
    ) -> AgentResult<Self> {
        let default_dir_mode = parse_mode(&config.default_dir_mode).ok_or_else(|| {
            AgentError::invalid(format!(
                "invalid default_dir_mode: {:?}",
                config.default_dir_mode
            ))
        })?;
        parse_mode(&config.default_data_mode).ok_or_else(|| {
            AgentError::invalid(format!(
                "invalid default_data_mode: {:?}",
                config.default_data_mode
            ))
        })?;

        match std::fs::metadata(&config.base_path) {
            Ok(info) if info.is_dir() => {}
            _ => {
                return Err(AgentError::internal(format!(
                    "base path {} does not exist or is not a directory",
                    config.base_path.display()
                )))
            }
        }
        if config.verify_backing_fs && !cowshed_btrfs::is_btrfs(&config.base_path) {
            return Err(AgentError::internal(format!(
                "base path {} is not on a btrfs filesystem",
                config.base_path.display()
            )));
        }

        let btrfs = BtrfsManager::with_binaries(
            runner,
            config.btrfs_bin.as_str(),
            config.chattr_bin.as_str(),
        );
        if !btrfs.is_available().await {
            return Err(AgentError::internal(
                "btrfs tools not found - is btrfs-progs installed?",
            ));
        }
        if config.quota_enabled {
            btrfs.quota_check(&config.base_path).await.map_err(|err| {
                AgentError::internal_with(
                    format!(
                        "quota_enabled is set but btrfs quota is not active on {} \
                         (run: btrfs quota enable {})",
                        config.base_path.display(),
                        config.base_path.display()
                    ),
                    err,
                )
            })?;
        }

        for tenant in &config.tenants {
            validate_name(tenant)
                .map_err(|_| AgentError::invalid(format!("invalid tenant name: {tenant:?}")))?;
            let tenant_dir = config.base_path.join(tenant);
            create_dir_with_mode(&tenant_dir, default_dir_mode).map_err(|err| {
                AgentError::internal_with(
                    format!("failed to create tenant directory {}", tenant_dir.display()),
                    err,
                )
            })?;
            create_dir_with_mode(&tenant_dir.join(SNAPSHOTS_DIR), default_dir_mode).map_err(
                |err| {
                    AgentError::internal_with(
                        format!("failed to create snapshots directory for tenant {tenant}"),
                        err,
                    )
                },
            )?;
        }
        info!(count = config.tenants.len(), "tenants configured");

        Ok(Self {
            base_path: config.base_path,
            quota_enabled: config.quota_enabled,
            tenants: config.tenants,
            default_dir_mode,
            default_data_mode: config.default_data_mode,
            btrfs,
            exporter,
            meta: MetaStore::new(),
            metrics: Arc::new(AgentMetrics::new()),
        })
    }

    /// Root of the managed tree.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Whether qgroup limits and usage sampling are active.
    pub fn quota_enabled(&self) -> bool {
        self.quota_enabled
    }

    /// The shared metrics collector.
    pub fn metrics(&self) -> Arc<AgentMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Launches the per-tenant background workers: a usage reconciler per
    /// tenant when quotas are enabled, and an export reconciler per tenant
    /// when `reconcile_interval` is non-zero. All workers stop when
    /// `shutdown` is cancelled.
    pub fn start_workers(
        &self,
        shutdown: CancellationToken,
        usage_interval: Duration,
        reconcile_interval: Duration,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for tenant in &self.tenants {
            let tenant_path = self.base_path.join(tenant);
            if self.quota_enabled {
                let worker = UsageReconciler::new(
                    tenant.clone(),
                    tenant_path.clone(),
                    self.btrfs.clone(),
                    self.meta.clone(),
                    self.metrics(),
                    self.quota_enabled,
                );
                handles.push(worker.spawn(usage_interval, shutdown.clone()));
            }
            if !reconcile_interval.is_zero() {
                let worker = ExportReconciler::new(
                    tenant.clone(),
                    tenant_path,
                    Arc::clone(&self.exporter),
                    self.meta.clone(),
                    self.metrics(),
                );
                handles.push(worker.spawn(reconcile_interval, shutdown.clone()));
            }
        }
        handles
    }

    fn tenant_path(&self, tenant: &str) -> AgentResult<PathBuf> {
        validate_name(tenant)?;
        let path = self.base_path.join(tenant);
        if !path.exists() {
            return Err(AgentError::not_found(format!("tenant {tenant:?} not found")));
        }
        Ok(path)
    }

    // --- Volume operations ---

    /// Creates a volume.
    ///
    /// Idempotency: when the volume directory already exists with readable
    /// metadata, the existing record is returned inside the
    /// `ALREADY_EXISTS` error. Unreadable metadata is `INTERNAL`.
    pub async fn create_volume(
        &self,
        tenant: &str,
        mut req: VolumeCreateRequest,
    ) -> AgentResult<VolumeRecord> {
        let tenant_dir = self.tenant_path(tenant)?;

        // validation
        validate_name(&req.name)?;
        if req.size_bytes == 0 {
            return Err(AgentError::invalid("size_bytes is required"));
        }
        if req.nocow && !matches!(req.compression.as_str(), "" | "none") {
            return Err(AgentError::invalid(
                "nocow and compression are mutually exclusive",
            ));
        }
        if !is_valid_compression(&req.compression) {
            return Err(AgentError::invalid(
                "compression must be one of: zstd, lzo, zlib, none",
            ));
        }
        if req.quota_bytes == 0 {
            req.quota_bytes = req.size_bytes;
        } else if req.quota_bytes < req.size_bytes {
            return Err(AgentError::invalid(format!(
                "quota_bytes {} must be at least size_bytes {}",
                req.quota_bytes, req.size_bytes
            )));
        }
        if req.mode.is_empty() {
            req.mode = self.default_data_mode.clone();
        }
        let mode = parse_mode(&req.mode)
            .ok_or_else(|| AgentError::invalid(format!("invalid mode: {}", req.mode)))?;

        // operations
        let vol_dir = tenant_dir.join(&req.name);
        let data_dir = vol_dir.join(DATA_DIR);

        if vol_dir.exists() {
            let existing: VolumeRecord = self
                .meta
                .read(&vol_dir.join(METADATA_FILE))
                .map_err(|err| {
                    AgentError::internal_with(
                        format!("volume {:?} exists but metadata is unreadable", req.name),
                        err,
                    )
                })?;
            return Err(AgentError::AlreadyExists {
                message: format!("volume {:?} already exists", req.name),
                record: Some(ConflictRecord::Volume(Box::new(existing))),
            });
        }

        create_dir_with_mode(&vol_dir, self.default_dir_mode).map_err(|err| {
            error!(path = %vol_dir.display(), error = %err, "failed to create volume directory");
            AgentError::internal_with("create volume directory failed", err)
        })?;

        if let Err(err) = self.btrfs.subvolume_create(&data_dir).await {
            let _ = std::fs::remove_dir_all(&vol_dir);
            error!(path = %data_dir.display(), error = %err, "failed to create subvolume");
            return Err(AgentError::internal_with("btrfs subvolume create failed", err));
        }

        // any failure from here on must also tear the subvolume down
        if let Err(err) = self.apply_create_attrs(&data_dir, &req).await {
            self.rollback_volume(&vol_dir, &data_dir).await;
            return Err(err);
        }

        if let Err(err) = std::fs::set_permissions(
            &data_dir,
            std::fs::Permissions::from_mode(mode),
        ) {
            error!(path = %data_dir.display(), error = %err, "failed to chmod data subvolume");
        }
        if let Err(err) = std::os::unix::fs::chown(&data_dir, Some(req.uid), Some(req.gid)) {
            error!(path = %data_dir.display(), error = %err, "failed to chown data subvolume");
        }

        let now = Utc::now();
        let record = VolumeRecord {
            name: req.name.clone(),
            path: vol_dir.clone(),
            size_bytes: req.size_bytes,
            nocow: req.nocow,
            compression: req.compression.clone(),
            quota_bytes: req.quota_bytes,
            used_bytes: 0,
            uid: req.uid,
            gid: req.gid,
            mode: req.mode.clone(),
            clients: Vec::new(),
            created_at: now,
            updated_at: now,
            last_attach_at: None,
        };

        if let Err(err) = self.meta.write_atomic(&vol_dir.join(METADATA_FILE), &record) {
            error!(error = %err, "failed to write volume metadata");
            self.rollback_volume(&vol_dir, &data_dir).await;
            return Err(AgentError::internal_with("failed to write metadata", err));
        }

        info!(tenant, name = %record.name, path = %vol_dir.display(), "volume created");
        Ok(record)
    }

    async fn apply_create_attrs(
        &self,
        data_dir: &Path,
        req: &VolumeCreateRequest,
    ) -> AgentResult<()> {
        if req.nocow {
            self.btrfs.set_nocow(data_dir).await.map_err(|err| {
                error!(path = %data_dir.display(), error = %err, "failed to set nocow");
                AgentError::internal_with("chattr +C failed", err)
            })?;
        }
        if !matches!(req.compression.as_str(), "" | "none") {
            self.btrfs
                .set_compression(data_dir, &req.compression)
                .await
                .map_err(|err| {
                    error!(path = %data_dir.display(), algo = %req.compression, error = %err,
                           "failed to set compression");
                    AgentError::internal_with("set compression failed", err)
                })?;
        }
        if self.quota_enabled {
            self.btrfs
                .qgroup_limit(data_dir, req.quota_bytes)
                .await
                .map_err(|err| {
                    error!(path = %data_dir.display(), bytes = req.quota_bytes, error = %err,
                           "failed to set qgroup limit");
                    AgentError::internal_with("qgroup limit failed", err)
                })?;
        }
        Ok(())
    }

    async fn rollback_volume(&self, vol_dir: &Path, data_dir: &Path) {
        let _ = self.btrfs.subvolume_delete(data_dir).await;
        let _ = std::fs::remove_dir_all(vol_dir);
    }

    /// Lists the tenant's volumes. Entries with unreadable metadata are
    /// silently dropped.
    pub fn list_volumes(&self, tenant: &str) -> AgentResult<Vec<VolumeRecord>> {
        let tenant_dir = self.tenant_path(tenant)?;

        let entries = std::fs::read_dir(&tenant_dir).map_err(|err| {
            error!(path = %tenant_dir.display(), error = %err, "failed to read tenant directory");
            AgentError::internal_with("failed to read tenant directory", err)
        })?;

        let mut volumes = Vec::new();
        for entry in entries.flatten() {
            if entry.file_name() == SNAPSHOTS_DIR {
                continue;
            }
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let meta_path = entry.path().join(METADATA_FILE);
            match self.meta.read::<VolumeRecord>(&meta_path) {
                Ok(record) => volumes.push(record),
                Err(_) => continue,
            }
        }
        Ok(volumes)
    }

    /// Reads one volume record.
    pub fn get_volume(&self, tenant: &str, name: &str) -> AgentResult<VolumeRecord> {
        let tenant_dir = self.tenant_path(tenant)?;
        validate_name(name)?;

        let meta_path = tenant_dir.join(name).join(METADATA_FILE);
        self.meta.read(&meta_path).map_err(|err| {
            if err.is_not_found() {
                AgentError::not_found(format!("volume {name:?} not found"))
            } else {
                AgentError::internal_with(format!("read metadata of volume {name:?}"), err)
            }
        })
    }

    /// Applies a partial update to a volume.
    ///
    /// Size may only grow (and drags the quota along); `nocow` is one-way
    /// and a `false` after `true` is dropped with a warning; compression
    /// obeys the grammar and the nocow exclusion.
    pub async fn update_volume(
        &self,
        tenant: &str,
        name: &str,
        mut req: VolumeUpdateRequest,
    ) -> AgentResult<VolumeRecord> {
        let tenant_dir = self.tenant_path(tenant)?;
        validate_name(name)?;

        let vol_dir = tenant_dir.join(name);
        let meta_path = vol_dir.join(METADATA_FILE);
        let data_dir = vol_dir.join(DATA_DIR);

        let cur: VolumeRecord = self
            .meta
            .read(&meta_path)
            .map_err(|_| AgentError::not_found(format!("volume {name:?} not found")))?;

        // validation
        if let Some(size) = req.size_bytes {
            if size <= cur.size_bytes {
                return Err(AgentError::invalid(format!(
                    "new size {} must be larger than current size {}",
                    size, cur.size_bytes
                )));
            }
        }
        if let Some(compression) = &req.compression {
            if !is_valid_compression(compression) {
                return Err(AgentError::invalid(
                    "compression must be one of: zstd, lzo, zlib, none",
                ));
            }
            if cur.nocow && !matches!(compression.as_str(), "" | "none") {
                return Err(AgentError::invalid(
                    "nocow and compression are mutually exclusive",
                ));
            }
        }
        let parsed_mode = match &req.mode {
            Some(mode) => Some(
                parse_mode(mode)
                    .ok_or_else(|| AgentError::invalid(format!("invalid mode: {mode}")))?,
            ),
            None => None,
        };

        // operations
        if let Some(size) = req.size_bytes {
            if self.quota_enabled {
                self.btrfs.qgroup_limit(&data_dir, size).await.map_err(|err| {
                    error!(volume = %name, error = %err, "failed to update qgroup limit");
                    AgentError::internal_with("qgroup limit failed", err)
                })?;
            }
        }

        if req.nocow == Some(true) && !cur.nocow {
            self.btrfs.set_nocow(&data_dir).await.map_err(|err| {
                error!(volume = %name, error = %err, "failed to set nocow");
                AgentError::internal_with("chattr +C failed", err)
            })?;
        } else if req.nocow == Some(false) && cur.nocow {
            warn!(volume = %name, "nocow cannot be reverted, ignoring");
            req.nocow = None;
        }

        if let Some(compression) = &req.compression {
            if !matches!(compression.as_str(), "" | "none") {
                self.btrfs
                    .set_compression(&data_dir, compression)
                    .await
                    .map_err(|err| {
                        error!(volume = %name, error = %err, "failed to set compression");
                        AgentError::internal_with("set compression failed", err)
                    })?;
            }
        }

        if req.uid.is_some() || req.gid.is_some() {
            let uid = req.uid.unwrap_or(cur.uid);
            let gid = req.gid.unwrap_or(cur.gid);
            std::os::unix::fs::chown(&data_dir, Some(uid), Some(gid)).map_err(|err| {
                error!(volume = %name, error = %err, "failed to chown");
                AgentError::internal_with("chown failed", err)
            })?;
        }

        if let Some(mode) = parsed_mode {
            std::fs::set_permissions(&data_dir, std::fs::Permissions::from_mode(mode)).map_err(
                |err| {
                    error!(volume = %name, error = %err, "failed to chmod");
                    AgentError::internal_with("chmod failed", err)
                },
            )?;
        }

        let updated = self
            .meta
            .update(&meta_path, |meta: &mut VolumeRecord| {
                if let Some(size) = req.size_bytes {
                    meta.size_bytes = size;
                    meta.quota_bytes = size;
                }
                if let Some(nocow) = req.nocow {
                    meta.nocow = nocow;
                }
                if let Some(compression) = req.compression.take() {
                    meta.compression = compression;
                }
                if let Some(uid) = req.uid {
                    meta.uid = uid;
                }
                if let Some(gid) = req.gid {
                    meta.gid = gid;
                }
                if let Some(mode) = req.mode.take() {
                    meta.mode = mode;
                }
                meta.updated_at = Utc::now();
            })
            .map_err(|err| {
                error!(volume = %name, error = %err, "failed to update metadata");
                AgentError::internal_with("failed to update metadata", err)
            })?;

        info!(tenant, name, "volume updated");
        Ok(updated)
    }

    /// Deletes a volume: withdraws its exports (best effort), deletes the
    /// data subvolume, and removes the volume directory.
    pub async fn delete_volume(&self, tenant: &str, name: &str) -> AgentResult<()> {
        let tenant_dir = self.tenant_path(tenant)?;
        validate_name(name)?;

        let vol_dir = tenant_dir.join(name);
        if !vol_dir.exists() {
            return Err(AgentError::not_found(format!("volume {name:?} not found")));
        }

        let vol_path = vol_dir.to_string_lossy();
        if let Err(err) = self.exporter.unexport(&vol_path, "").await {
            warn!(path = %vol_path, error = %err, "failed to unexport volume, reconciler will clean up");
        }

        let data_dir = vol_dir.join(DATA_DIR);
        if let Err(err) = self.btrfs.subvolume_delete(&data_dir).await {
            error!(volume = %name, error = %err, "failed to delete subvolume");
            return Err(AgentError::internal_with("btrfs subvolume delete failed", err));
        }

        if let Err(err) = std::fs::remove_dir_all(&vol_dir) {
            error!(volume = %name, error = %err, "failed to remove volume directory");
            return Err(AgentError::internal_with("failed to remove volume directory", err));
        }

        self.metrics.forget_volume(tenant, name);
        info!(tenant, name, "volume deleted");
        Ok(())
    }

    // --- Export operations ---

    /// Publishes a volume to a client.
    ///
    /// Metadata is updated first: if the export call then fails, the
    /// export reconciler retries from metadata; if the export succeeds but
    /// a retried API call repeats it, the add is a no-op.
    pub async fn export_volume(&self, tenant: &str, name: &str, client: &str) -> AgentResult<()> {
        let tenant_dir = self.tenant_path(tenant)?;
        validate_name(name)?;

        let vol_dir = tenant_dir.join(name);
        if !vol_dir.exists() {
            return Err(AgentError::not_found(format!("volume {name:?} not found")));
        }

        let meta_path = vol_dir.join(METADATA_FILE);
        let client_owned = client.to_string();
        self.meta
            .update(&meta_path, |meta: &mut VolumeRecord| {
                let now = Utc::now();
                meta.last_attach_at = Some(now);
                meta.updated_at = now;
                if !meta.clients.iter().any(|c| c == &client_owned) {
                    meta.clients.push(client_owned.clone());
                }
            })
            .map_err(|err| {
                error!(volume = %name, error = %err, "failed to persist client in metadata");
                AgentError::internal_with("failed to persist client in metadata", err)
            })?;

        if let Err(err) = self.exporter.export(&vol_dir.to_string_lossy(), client).await {
            error!(name, client, error = %err, "failed to export, reconciler will retry");
            return Err(AgentError::internal_with("nfs export failed", err));
        }

        info!(tenant, name, client, "NFS export added");
        Ok(())
    }

    /// Withdraws a volume from a client. Metadata first, mirroring
    /// [`StorageAgent::export_volume`].
    pub async fn unexport_volume(&self, tenant: &str, name: &str, client: &str) -> AgentResult<()> {
        let tenant_dir = self.tenant_path(tenant)?;
        validate_name(name)?;

        let vol_dir = tenant_dir.join(name);
        if !vol_dir.exists() {
            return Err(AgentError::not_found(format!("volume {name:?} not found")));
        }

        let meta_path = vol_dir.join(METADATA_FILE);
        let client_owned = client.to_string();
        self.meta
            .update(&meta_path, |meta: &mut VolumeRecord| {
                meta.clients.retain(|c| c != &client_owned);
                meta.updated_at = Utc::now();
            })
            .map_err(|err| {
                error!(volume = %name, error = %err, "failed to update client list in metadata");
                AgentError::internal_with("failed to update client list in metadata", err)
            })?;

        if let Err(err) = self.exporter.unexport(&vol_dir.to_string_lossy(), client).await {
            error!(name, client, error = %err, "failed to unexport, reconciler will clean up");
            return Err(AgentError::internal_with("nfs unexport failed", err));
        }

        info!(tenant, name, client, "NFS export removed");
        Ok(())
    }

    /// Lists the live exports under the tenant's directory. Exports of
    /// other tenants are never revealed.
    pub async fn list_exports(&self, tenant: &str) -> AgentResult<Vec<ExportEntry>> {
        let tenant_dir = self.tenant_path(tenant)?;

        let exports = self
            .exporter
            .list_exports()
            .await
            .map_err(|err| AgentError::internal_with("list exports failed", err))?;

        let prefix = format!("{}/", tenant_dir.display());
        Ok(exports
            .into_iter()
            .filter(|e| e.path.starts_with(&prefix))
            .map(|e| ExportEntry {
                path: e.path,
                client: e.client,
            })
            .collect())
    }

    // --- Stats ---

    /// Filesystem totals of the tenant's backing filesystem.
    pub fn stats(&self, tenant: &str) -> AgentResult<FsStats> {
        let tenant_dir = self.tenant_path(tenant)?;
        let totals = cowshed_btrfs::fs_totals(&tenant_dir)
            .map_err(|err| AgentError::internal_with("statfs failed", err))?;
        Ok(FsStats {
            total_bytes: totals.total_bytes,
            used_bytes: totals.total_bytes - totals.available_bytes,
            free_bytes: totals.available_bytes,
        })
    }

    // --- Snapshot operations ---

    /// Snapshots a volume read-only into `<tenant>/snapshots/<name>/`.
    pub async fn create_snapshot(
        &self,
        tenant: &str,
        req: SnapshotCreateRequest,
    ) -> AgentResult<SnapshotRecord> {
        let tenant_dir = self.tenant_path(tenant)?;

        // validation
        validate_name(&req.name)?;
        validate_name(&req.volume)?;
        let vol_dir = tenant_dir.join(&req.volume);
        let src_data = vol_dir.join(DATA_DIR);
        if !src_data.exists() {
            return Err(AgentError::not_found(format!(
                "source volume {:?} not found",
                req.volume
            )));
        }
        let vol_meta: VolumeRecord = self
            .meta
            .read(&vol_dir.join(METADATA_FILE))
            .map_err(|err| AgentError::internal_with("read volume metadata", err))?;

        let snap_dir = tenant_dir.join(SNAPSHOTS_DIR).join(&req.name);
        if snap_dir.exists() {
            return Err(AgentError::AlreadyExists {
                message: format!("snapshot {:?} already exists", req.name),
                record: None,
            });
        }

        // operations
        create_dir_with_mode(&snap_dir, self.default_dir_mode).map_err(|err| {
            error!(error = %err, "failed to create snapshot directory");
            AgentError::internal_with("failed to create snapshot directory", err)
        })?;

        let dst_data = snap_dir.join(DATA_DIR);
        if let Err(err) = self.btrfs.subvolume_snapshot(&src_data, &dst_data, true).await {
            let _ = std::fs::remove_dir_all(&snap_dir);
            error!(error = %err, "failed to create snapshot");
            return Err(AgentError::internal_with("btrfs snapshot failed", err));
        }

        let now = Utc::now();
        let record = SnapshotRecord {
            name: req.name.clone(),
            volume: req.volume.clone(),
            path: snap_dir.clone(),
            size_bytes: vol_meta.size_bytes,
            used_bytes: 0,
            exclusive_bytes: 0,
            readonly: true,
            created_at: now,
            updated_at: now,
        };

        if let Err(err) = self.meta.write_atomic(&snap_dir.join(METADATA_FILE), &record) {
            error!(error = %err, "failed to write snapshot metadata");
            let _ = self.btrfs.subvolume_delete(&dst_data).await;
            let _ = std::fs::remove_dir_all(&snap_dir);
            return Err(AgentError::internal_with("failed to write metadata", err));
        }

        info!(tenant, name = %req.name, volume = %req.volume, "snapshot created");
        Ok(record)
    }

    /// Lists snapshots, optionally filtered to one source volume.
    pub fn list_snapshots(
        &self,
        tenant: &str,
        volume: Option<&str>,
    ) -> AgentResult<Vec<SnapshotRecord>> {
        let tenant_dir = self.tenant_path(tenant)?;

        let snap_base = tenant_dir.join(SNAPSHOTS_DIR);
        let entries = match std::fs::read_dir(&snap_base) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                error!(error = %err, "failed to read snapshots directory");
                return Err(AgentError::internal_with(
                    "failed to read snapshots directory",
                    err,
                ));
            }
        };

        let mut snapshots = Vec::new();
        for entry in entries.flatten() {
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let meta_path = entry.path().join(METADATA_FILE);
            let record: SnapshotRecord = match self.meta.read(&meta_path) {
                Ok(record) => record,
                Err(_) => continue,
            };
            if let Some(volume) = volume {
                if record.volume != volume {
                    continue;
                }
            }
            snapshots.push(record);
        }
        Ok(snapshots)
    }

    /// Deletes a snapshot. Both the subvolume delete and the directory
    /// removal are fatal on failure.
    pub async fn delete_snapshot(&self, tenant: &str, name: &str) -> AgentResult<()> {
        let tenant_dir = self.tenant_path(tenant)?;
        validate_name(name)?;

        let snap_dir = tenant_dir.join(SNAPSHOTS_DIR).join(name);
        if !snap_dir.exists() {
            return Err(AgentError::not_found(format!("snapshot {name:?} not found")));
        }

        let data_dir = snap_dir.join(DATA_DIR);
        if let Err(err) = self.btrfs.subvolume_delete(&data_dir).await {
            error!(snapshot = %name, error = %err, "failed to delete snapshot subvolume");
            return Err(AgentError::internal_with("btrfs subvolume delete failed", err));
        }

        if let Err(err) = std::fs::remove_dir_all(&snap_dir) {
            error!(snapshot = %name, error = %err, "failed to remove snapshot directory");
            return Err(AgentError::internal_with(
                "failed to remove snapshot directory",
                err,
            ));
        }

        info!(tenant, name, "snapshot deleted");
        Ok(())
    }

    // --- Clone operations ---

    /// Materializes a writable volume sibling from a snapshot.
    ///
    /// Same conflict behavior as [`StorageAgent::create_volume`]: an
    /// existing clone is returned inside the `ALREADY_EXISTS` error.
    pub async fn create_clone(
        &self,
        tenant: &str,
        req: CloneCreateRequest,
    ) -> AgentResult<CloneRecord> {
        let tenant_dir = self.tenant_path(tenant)?;

        // validation
        validate_name(&req.name)?;
        validate_name(&req.snapshot)?;
        let snap_dir = tenant_dir.join(SNAPSHOTS_DIR).join(&req.snapshot);
        let src_data = snap_dir.join(DATA_DIR);
        if !src_data.exists() {
            return Err(AgentError::not_found(format!(
                "source snapshot {:?} not found",
                req.snapshot
            )));
        }
        let clone_dir = tenant_dir.join(&req.name);
        if clone_dir.exists() {
            let existing: CloneRecord = self
                .meta
                .read(&clone_dir.join(METADATA_FILE))
                .map_err(|err| {
                    AgentError::internal_with(
                        format!("clone {:?} exists but metadata is unreadable", req.name),
                        err,
                    )
                })?;
            return Err(AgentError::AlreadyExists {
                message: format!("clone {:?} already exists", req.name),
                record: Some(ConflictRecord::Clone(Box::new(existing))),
            });
        }

        // operations
        create_dir_with_mode(&clone_dir, self.default_dir_mode).map_err(|err| {
            error!(error = %err, "failed to create clone directory");
            AgentError::internal_with("failed to create clone directory", err)
        })?;

        let dst_data = clone_dir.join(DATA_DIR);
        if let Err(err) = self.btrfs.subvolume_snapshot(&src_data, &dst_data, false).await {
            let _ = std::fs::remove_dir_all(&clone_dir);
            error!(error = %err, "failed to create clone");
            return Err(AgentError::internal_with("btrfs snapshot failed", err));
        }

        let record = CloneRecord {
            name: req.name.clone(),
            source_snapshot: req.snapshot.clone(),
            path: clone_dir.clone(),
            created_at: Utc::now(),
        };

        if let Err(err) = self.meta.write_atomic(&clone_dir.join(METADATA_FILE), &record) {
            error!(error = %err, "failed to write clone metadata");
            let _ = self.btrfs.subvolume_delete(&dst_data).await;
            let _ = std::fs::remove_dir_all(&clone_dir);
            return Err(AgentError::internal_with("failed to write metadata", err));
        }

        info!(tenant, name = %req.name, snapshot = %req.snapshot, "clone created");
        Ok(record)
    }
}

fn create_dir_with_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(mode)
        .create(path)
}
