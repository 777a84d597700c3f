//! Atomic per-resource JSON metadata store.
//!
//! Each volume, snapshot, and clone keeps one `metadata.json` next to its
//! data subvolume. This crate provides atomic read/update/write of those
//! documents and serializes concurrent mutations of the same file through
//! a reference-counted per-path mutex registry that holds no entries while
//! nothing is in flight.

pub mod error;
pub mod locks;
pub mod store;

pub use error::{MetaError, MetaResult};
pub use locks::LockRegistry;
pub use store::MetaStore;
