//! Content storage backends.
//!
//! A storage backend is a byte-addressed blob store keyed by store-relative
//! slash paths. Every backend embeds a versioning backend (possibly no-op).
//!
//! ## Adding a New Storage Backend
//!
//! 1. Implement the `Storage` trait
//! 2. Add a variant to `StorageBackend`
//! 3. Teach `StorageBackend::detect` when to pick it

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::core::context::Options;
use crate::core::domain::Finding;
use crate::core::rcs::Rcs;
use crate::error::Result;

mod backend;
mod fs;

pub use backend::StorageBackend;
pub use fs::Fs;

/// Blob storage trait.
pub trait Storage: Send + Sync + fmt::Debug {
    /// Backend name for display.
    fn name(&self) -> &'static str;

    /// Store root on disk.
    fn path(&self) -> &Path;

    /// Read an entry.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the entry is absent.
    fn get(&self, opts: &Options, name: &str) -> Result<Vec<u8>>;

    /// Atomically replace an entry.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::MeaninglessWrite` when the entry already holds
    /// exactly these bytes; callers treat that as success without commit.
    fn set(&self, opts: &Options, name: &str, value: &[u8]) -> Result<()>;

    /// Remove a file and any parent directories it leaves empty.
    fn delete(&self, opts: &Options, name: &str) -> Result<()>;

    fn exists(&self, opts: &Options, name: &str) -> bool;

    fn is_dir(&self, opts: &Options, name: &str) -> bool;

    /// Every file at or under `prefix`, sorted.
    fn list(&self, opts: &Options, prefix: &str) -> Result<Vec<String>>;

    /// Remove a subtree and any ancestors it leaves empty.
    fn prune(&self, opts: &Options, prefix: &str) -> Result<()>;

    /// Rename or copy an entry within the store.
    fn move_entry(&self, opts: &Options, from: &str, to: &str, delete_source: bool) -> Result<()>;

    /// Create `to` as a relative symlink pointing at `from`.
    fn link(&self, opts: &Options, from: &str, to: &str) -> Result<()>;

    /// Repair permissions and remove empty directories.
    fn fsck(&self, opts: &Options) -> Result<Vec<Finding>>;

    /// Embedded versioning backend.
    fn rcs(&self) -> &dyn Rcs;
}

/// Open the storage backend appropriate for `path`.
pub fn open(path: &Path) -> Result<Arc<dyn Storage>> {
    StorageBackend::detect(path).open(path)
}
