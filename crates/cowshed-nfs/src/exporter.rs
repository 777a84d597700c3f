//! The export-table abstraction.

use async_trait::async_trait;
use thiserror::Error;

use cowshed_exec::CommandError;

/// Result type alias for export operations.
pub type ExporterResult<T> = Result<T, ExporterError>;

/// Error surface for export-table manipulation.
#[derive(Debug, Error)]
pub enum ExporterError {
    /// The export tool invocation failed.
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// One active export: a path published to a single client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportInfo {
    /// Exported directory.
    pub path: String,
    /// Client identifier (address, CIDR, or hostname) the path is
    /// published to.
    pub client: String,
}

/// Manages the host's export table.
#[async_trait]
pub trait Exporter: Send + Sync {
    /// Publishes `path` to `client`.
    async fn export(&self, path: &str, client: &str) -> ExporterResult<()>;

    /// Withdraws `path` from `client`. An empty client withdraws the path
    /// from every client currently holding it.
    async fn unexport(&self, path: &str, client: &str) -> ExporterResult<()>;

    /// Returns every `(path, client)` pair currently exported, in table
    /// order.
    async fn list_exports(&self) -> ExporterResult<Vec<ExportInfo>>;
}
