//! Atomic document read/update/write.

use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{MetaError, MetaResult};
use crate::locks::LockRegistry;

/// On-disk JSON document store.
///
/// Writes go to `<path>.tmp` and are renamed over the document so readers
/// never observe a torn file; the rename is atomic on the backing
/// filesystem. [`MetaStore::update`] serializes concurrent mutations of
/// the same path through the shared [`LockRegistry`].
///
/// Cloning is cheap and clones share the registry.
#[derive(Clone, Debug, Default)]
pub struct MetaStore {
    locks: Arc<LockRegistry>,
}

impl MetaStore {
    /// Creates a store with its own lock registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads and decodes the document at `path`.
    pub fn read<T: DeserializeOwned>(&self, path: &Path) -> MetaResult<T> {
        let data = std::fs::read(path).map_err(|source| MetaError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&data).map_err(|source| MetaError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Encodes `value` and atomically replaces the document at `path`.
    pub fn write_atomic<T: Serialize>(&self, path: &Path, value: &T) -> MetaResult<()> {
        let data = serde_json::to_vec_pretty(value).map_err(|source| MetaError::Encode {
            path: path.to_path_buf(),
            source,
        })?;

        let tmp = {
            let mut os = path.as_os_str().to_os_string();
            os.push(".tmp");
            std::path::PathBuf::from(os)
        };
        let write = |source| MetaError::Write {
            path: path.to_path_buf(),
            source,
        };
        std::fs::write(&tmp, data).map_err(write)?;
        std::fs::rename(&tmp, path).map_err(write)
    }

    /// Reads the document, applies `mutate` exactly once, and writes the
    /// result back atomically, all under the per-path lock. A read failure
    /// aborts before anything is written. Returns the updated value.
    pub fn update<T, F>(&self, path: &Path, mutate: F) -> MetaResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T),
    {
        let _guard = self.locks.lock(path);
        let mut value: T = self.read(path)?;
        mutate(&mut value);
        self.write_atomic(path, &value)?;
        Ok(value)
    }

    /// Number of paths with an in-flight mutation. Exposed for lock-leak
    /// assertions in tests.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }
}
