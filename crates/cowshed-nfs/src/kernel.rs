//! Kernel NFS server exporter driving `exportfs`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use cowshed_exec::Runner;

use crate::exporter::{ExportInfo, Exporter, ExporterError, ExporterResult};

/// Derives the stable fsid for an export path.
///
/// `exportfs` needs a per-export fsid; deriving it from the path keeps it
/// identical across agent restarts so clients do not have to remount. The
/// value is the IEEE CRC32 of the path masked to a positive 31-bit integer,
/// with zero mapped to one (fsid=0 is reserved for the NFS root).
pub fn export_fsid(path: &str) -> u32 {
    let fsid = crc32fast::hash(path.as_bytes()) & 0x7FFF_FFFF;
    if fsid == 0 {
        1
    } else {
        fsid
    }
}

/// [`Exporter`] implementation over the kernel NFS server's `exportfs`.
#[derive(Clone)]
pub struct KernelExporter {
    runner: Arc<dyn Runner>,
    bin: String,
}

impl KernelExporter {
    /// Creates an exporter using `exportfs` from `$PATH`.
    pub fn new(runner: Arc<dyn Runner>) -> Self {
        Self::with_binary(runner, "exportfs")
    }

    /// Creates an exporter with an explicit tool path.
    pub fn with_binary(runner: Arc<dyn Runner>, bin: impl Into<String>) -> Self {
        Self {
            runner,
            bin: bin.into(),
        }
    }

    /// Removes a single `(path, client)` export, treating "already gone"
    /// as success.
    async fn unexport_one(&self, path: &str, client: &str) -> ExporterResult<()> {
        let target = format!("{client}:{path}");
        match self.runner.run(&self.bin, &["-u", &target]).await {
            Ok(_) => Ok(()),
            Err(err) if err.output.contains("Could not find") => {
                debug!(%target, "export not found, skipping unexport");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Returns every client the given path is currently exported to.
    async fn exported_clients(&self, path: &str) -> ExporterResult<Vec<String>> {
        let exports = self.list_exports().await?;
        Ok(exports
            .into_iter()
            .filter(|e| e.path == path)
            .map(|e| e.client)
            .collect())
    }
}

#[async_trait]
impl Exporter for KernelExporter {
    async fn export(&self, path: &str, client: &str) -> ExporterResult<()> {
        let opts = format!(
            "rw,nohide,crossmnt,no_root_squash,no_subtree_check,fsid={}",
            export_fsid(path)
        );
        self.runner
            .run(&self.bin, &["-o", &opts, &format!("{client}:{path}")])
            .await?;
        Ok(())
    }

    async fn unexport(&self, path: &str, client: &str) -> ExporterResult<()> {
        if !client.is_empty() {
            return self.unexport_one(path, client).await;
        }

        // remove all clients for this path; keep going past individual
        // failures and surface the last one
        let clients = self.exported_clients(path).await?;
        let mut last_err: Option<ExporterError> = None;
        for client in clients {
            if let Err(err) = self.unexport_one(path, &client).await {
                last_err = Some(err);
            }
        }
        match last_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn list_exports(&self) -> ExporterResult<Vec<ExportInfo>> {
        let out = self.runner.run(&self.bin, &["-v"]).await?;
        Ok(parse_exports(&out))
    }
}

/// Parses `exportfs -v` output.
///
/// The tool emits each export either on a single line,
///
/// ```text
/// /srv/t1/vol1/  10.0.0.1(rw,fsid=42,...)
/// ```
///
/// or, for long paths, as a bare path followed by one or more indented
/// client lines:
///
/// ```text
/// /srv/tenant-with-a-long-name/volume/
///         10.0.0.1(rw,fsid=42,...)
///         10.0.0.2(rw,fsid=42,...)
/// ```
///
/// Indented lines are only meaningful below a bare path line; every client
/// under a wrapped path yields its own entry and input order is preserved.
fn parse_exports(out: &str) -> Vec<ExportInfo> {
    let mut exports = Vec::new();
    let mut pending_path: Option<String> = None;

    for line in out.lines() {
        let indented = line.starts_with('\t') || line.starts_with(' ');
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }

        if !indented && fields.len() >= 2 {
            // path and client on the same line
            let client = fields[1].split('(').next().unwrap_or(fields[1]);
            exports.push(ExportInfo {
                path: fields[0].to_string(),
                client: client.to_string(),
            });
            pending_path = None;
        } else if !indented {
            // bare path, clients follow indented
            pending_path = Some(fields[0].to_string());
        } else if let Some(path) = &pending_path {
            let client = fields[0].split('(').next().unwrap_or(fields[0]);
            exports.push(ExportInfo {
                path: path.clone(),
                client: client.to_string(),
            });
        }
    }
    exports
}
