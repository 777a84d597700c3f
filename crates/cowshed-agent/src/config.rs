//! Agent configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Startup configuration for the storage agent.
///
/// Intervals are plain seconds so the struct stays trivially serializable;
/// the worker API takes [`Duration`]s via the accessors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Root of the managed tree. Must exist and sit on btrfs.
    pub base_path: PathBuf,
    /// Whether qgroup limits and usage sampling are active.
    pub quota_enabled: bool,
    /// Tenants to provision at startup, in order.
    pub tenants: Vec<String>,
    /// Octal mode for tenant/volume directory creation.
    pub default_dir_mode: String,
    /// Octal mode applied to freshly created data subvolumes when a
    /// request does not specify one.
    pub default_data_mode: String,
    /// Usage reconciler interval in seconds.
    pub usage_interval_secs: u64,
    /// Export reconciler interval in seconds. Zero disables it.
    pub reconcile_interval_secs: u64,
    /// Path of the btrfs tool.
    pub btrfs_bin: String,
    /// Path of the chattr tool.
    pub chattr_bin: String,
    /// Path of the exportfs tool.
    pub exportfs_bin: String,
    /// Verify at startup that `base_path` is on btrfs. Tests running on
    /// scratch filesystems turn this off.
    #[serde(default = "default_true")]
    pub verify_backing_fs: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./storage"),
            quota_enabled: true,
            tenants: Vec::new(),
            default_dir_mode: "2770".to_string(),
            default_data_mode: "2770".to_string(),
            usage_interval_secs: 60,
            reconcile_interval_secs: 600,
            btrfs_bin: "btrfs".to_string(),
            chattr_bin: "chattr".to_string(),
            exportfs_bin: "exportfs".to_string(),
            verify_backing_fs: true,
        }
    }
}

impl AgentConfig {
    /// Usage reconciler interval.
    pub fn usage_interval(&self) -> Duration {
        Duration::from_secs(self.usage_interval_secs)
    }

    /// Export reconciler interval. Zero disables the reconciler.
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}
