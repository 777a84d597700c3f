//! Reference-counted per-path mutex registry.
//!
//! A plain `HashMap<PathBuf, Mutex>` grows without bound as volume names
//! churn over the agent's lifetime. Entries here are counted and removed
//! when the last holder releases, so the registry is empty whenever no
//! mutation is in flight. Two callers for the same path always get the
//! same mutex; callers for different paths never contend.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

#[derive(Debug)]
struct Entry {
    lock: Arc<Mutex<()>>,
    refs: usize,
}

/// Hands out one mutex per path and forgets it when the last holder leaves.
#[derive(Debug, Default)]
pub struct LockRegistry {
    entries: Mutex<HashMap<PathBuf, Entry>>,
}

/// Holds the per-path lock; releasing drops the registry entry when this
/// was the last holder.
pub struct PathGuard<'a> {
    registry: &'a LockRegistry,
    path: PathBuf,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl LockRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the lock for `path` is held.
    ///
    /// The registry-wide lock is only held for the map lookup and refcount
    /// bump, never while blocking on the per-path mutex.
    pub fn lock(&self, path: &Path) -> PathGuard<'_> {
        let lock = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(path.to_path_buf()).or_insert_with(|| Entry {
                lock: Arc::new(Mutex::new(())),
                refs: 0,
            });
            entry.refs += 1;
            Arc::clone(&entry.lock)
        };
        let guard = lock.lock_arc();
        PathGuard {
            registry: self,
            path: path.to_path_buf(),
            guard: Some(guard),
        }
    }

    /// Number of paths currently tracked. Returns to zero once every
    /// in-flight mutation has finished.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when no path is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        // release the per-path lock before touching the registry
        self.guard.take();
        let mut entries = self.registry.entries.lock();
        if let Some(entry) = entries.get_mut(&self.path) {
            entry.refs -= 1;
            if entry.refs == 0 {
                entries.remove(&self.path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_registry_empties_after_release() {
        let registry = LockRegistry::new();
        {
            let _guard = registry.lock(Path::new("/a/metadata.json"));
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_distinct_paths_do_not_contend() {
        let registry = LockRegistry::new();
        let _a = registry.lock(Path::new("/a/metadata.json"));
        // acquiring a different path must not block
        let _b = registry.lock(Path::new("/b/metadata.json"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_same_path_serializes_across_threads() {
        let registry = Arc::new(LockRegistry::new());
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            let running = Arc::clone(&running);
            let max_seen = Arc::clone(&max_seen);
            handles.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    let _guard = registry.lock(Path::new("/shared/metadata.json"));
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    running.fetch_sub(1, Ordering::SeqCst);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1, "lock was not exclusive");
        assert!(registry.is_empty(), "registry leaked entries");
    }

    #[test]
    fn test_refcount_survives_waiters() {
        let registry = Arc::new(LockRegistry::new());
        let guard = registry.lock(Path::new("/shared/metadata.json"));

        let waiter = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                let _guard = registry.lock(Path::new("/shared/metadata.json"));
            })
        };

        // give the waiter time to enqueue, then release
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(registry.len(), 1);
        drop(guard);
        waiter.join().unwrap();
        assert!(registry.is_empty());
    }
}
