//! Subvolume and quota-group operations over btrfs-progs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use cowshed_exec::Runner;

use crate::compression::is_valid_compression;
use crate::error::{BtrfsError, BtrfsResult};

/// Referenced and exclusive byte counts of a subvolume's qgroup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QgroupUsage {
    /// Logical bytes reachable from the subvolume, including extents
    /// shared with other subvolumes.
    pub referenced: u64,
    /// Bytes that would be freed if the subvolume were deleted.
    pub exclusive: u64,
}

/// Driver for btrfs subvolume, attribute, and qgroup operations.
///
/// Every operation shells out through the injected [`Runner`]; the driver
/// itself never touches the filesystem.
#[derive(Clone)]
pub struct BtrfsManager {
    runner: Arc<dyn Runner>,
    btrfs_bin: String,
    chattr_bin: String,
}

impl std::fmt::Debug for BtrfsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtrfsManager")
            .field("btrfs_bin", &self.btrfs_bin)
            .field("chattr_bin", &self.chattr_bin)
            .finish_non_exhaustive()
    }
}

impl BtrfsManager {
    /// Creates a driver using `btrfs` and `chattr` from `$PATH`.
    pub fn new(runner: Arc<dyn Runner>) -> Self {
        Self::with_binaries(runner, "btrfs", "chattr")
    }

    /// Creates a driver with explicit tool paths.
    pub fn with_binaries(
        runner: Arc<dyn Runner>,
        btrfs_bin: impl Into<String>,
        chattr_bin: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            btrfs_bin: btrfs_bin.into(),
            chattr_bin: chattr_bin.into(),
        }
    }

    async fn btrfs(&self, args: &[&str]) -> BtrfsResult<String> {
        Ok(self.runner.run(&self.btrfs_bin, args).await?)
    }

    /// Creates a subvolume at `path`.
    pub async fn subvolume_create(&self, path: &Path) -> BtrfsResult<()> {
        self.btrfs(&["subvolume", "create", &path.to_string_lossy()])
            .await?;
        Ok(())
    }

    /// Deletes the subvolume at `path`.
    pub async fn subvolume_delete(&self, path: &Path) -> BtrfsResult<()> {
        self.btrfs(&["subvolume", "delete", &path.to_string_lossy()])
            .await?;
        Ok(())
    }

    /// Snapshots `src` to `dst`, read-only when `readonly` is set.
    pub async fn subvolume_snapshot(
        &self,
        src: &Path,
        dst: &Path,
        readonly: bool,
    ) -> BtrfsResult<()> {
        let src = src.to_string_lossy();
        let dst = dst.to_string_lossy();
        if readonly {
            self.btrfs(&["subvolume", "snapshot", "-r", &src, &dst])
                .await?;
        } else {
            self.btrfs(&["subvolume", "snapshot", &src, &dst]).await?;
        }
        Ok(())
    }

    /// Returns true when `path` is a subvolume.
    pub async fn subvolume_exists(&self, path: &Path) -> bool {
        self.btrfs(&["subvolume", "show", &path.to_string_lossy()])
            .await
            .is_ok()
    }

    /// Lists the subvolumes directly below `parent`.
    pub async fn subvolume_list(&self, parent: &Path) -> BtrfsResult<Vec<PathBuf>> {
        let out = self
            .btrfs(&["subvolume", "list", "-o", &parent.to_string_lossy()])
            .await?;

        let mut subvolumes = Vec::new();
        for line in out.lines() {
            // format: ID <id> gen <gen> top level <tl> path <path>
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() >= 9 {
                subvolumes.push(PathBuf::from(fields[8]));
            }
        }
        Ok(subvolumes)
    }

    /// Verifies that quota accounting is enabled on the filesystem holding
    /// `mount`. `qgroup show` fails when quotas are off.
    pub async fn quota_check(&self, mount: &Path) -> BtrfsResult<()> {
        self.btrfs(&["qgroup", "show", &mount.to_string_lossy()])
            .await?;
        Ok(())
    }

    /// Sets the qgroup referenced-bytes limit for the subvolume at `path`.
    pub async fn qgroup_limit(&self, path: &Path, bytes: u64) -> BtrfsResult<()> {
        self.btrfs(&["qgroup", "limit", &bytes.to_string(), &path.to_string_lossy()])
            .await?;
        Ok(())
    }

    /// Returns the referenced bytes of the subvolume's qgroup.
    pub async fn qgroup_usage(&self, path: &Path) -> BtrfsResult<u64> {
        Ok(self.qgroup_usage_ex(path).await?.referenced)
    }

    /// Returns referenced and exclusive bytes of the subvolume's qgroup.
    ///
    /// Resolves the subvolume ID from `subvolume show`, then scans the raw
    /// `qgroup show` table for the `0/<id>` row.
    pub async fn qgroup_usage_ex(&self, path: &Path) -> BtrfsResult<QgroupUsage> {
        let show = self
            .btrfs(&["subvolume", "show", &path.to_string_lossy()])
            .await?;

        let mut subvol_id = None;
        for line in show.lines() {
            if let Some(rest) = line.trim().strip_prefix("Subvolume ID:") {
                let id = rest.trim();
                if !id.is_empty() {
                    subvol_id = Some(id.to_string());
                }
                break;
            }
        }
        let subvol_id = subvol_id.ok_or_else(|| BtrfsError::SubvolumeIdNotFound {
            path: path.to_path_buf(),
        })?;
        let qgroup = format!("0/{subvol_id}");

        let out = self
            .btrfs(&["qgroup", "show", "-re", "--raw", &path.to_string_lossy()])
            .await?;
        for line in out.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() >= 3 && fields[0] == qgroup {
                let parse = |s: &str| {
                    s.parse::<u64>().map_err(|_| BtrfsError::MalformedQgroupRow {
                        path: path.to_path_buf(),
                        row: line.to_string(),
                    })
                };
                return Ok(QgroupUsage {
                    referenced: parse(fields[1])?,
                    exclusive: parse(fields[2])?,
                });
            }
        }
        Err(BtrfsError::QgroupNotFound {
            qgroup,
            path: path.to_path_buf(),
        })
    }

    /// Sets the no-COW attribute on `path` via `chattr +C`.
    ///
    /// Only effective while the subvolume is empty; the caller applies it
    /// immediately after creation.
    pub async fn set_nocow(&self, path: &Path) -> BtrfsResult<()> {
        self.runner
            .run(&self.chattr_bin, &["+C", &path.to_string_lossy()])
            .await?;
        Ok(())
    }

    /// Sets the compression property on `path`.
    ///
    /// The value is validated against the `algo[:level]` grammar before any
    /// process is spawned.
    pub async fn set_compression(&self, path: &Path, algo: &str) -> BtrfsResult<()> {
        if !is_valid_compression(algo) {
            return Err(BtrfsError::InvalidCompression {
                value: algo.to_string(),
            });
        }
        self.btrfs(&["property", "set", &path.to_string_lossy(), "compression", algo])
            .await?;
        Ok(())
    }

    /// Returns true when the btrfs tooling is runnable.
    pub async fn is_available(&self) -> bool {
        let available = self.btrfs(&["--version"]).await.is_ok();
        debug!(available, "btrfs availability probe");
        available
    }
}
