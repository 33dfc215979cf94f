//! Versioning (RCS) backends.
//!
//! A storage backend carries one RCS. The no-op backend is used for plain
//! directories; git is used when the store root is a repository.
//!
//! ## Adding a New Backend
//!
//! 1. Implement the `Rcs` trait
//! 2. Add the implementation in a new file
//! 3. Teach `StorageBackend::detect` to recognize it

use std::fmt;

use tracing::{debug, warn};

use crate::core::context::Options;
use crate::core::domain::Revision;
use crate::error::{Error, Result};

mod git;
mod noop;

pub use git::Git;
pub use noop::Noop;

/// Versioning operations over a store directory.
pub trait Rcs: Send + Sync + fmt::Debug {
    /// Backend name for display.
    fn name(&self) -> &'static str;

    /// Whether a repository exists at the store root.
    fn is_initialized(&self) -> bool;

    /// Stage store-relative paths; an empty slice stages everything.
    fn add(&self, opts: &Options, paths: &[&str]) -> Result<()>;

    /// Record staged changes.
    ///
    /// # Errors
    ///
    /// Returns `RcsError::NothingToCommit` when nothing is staged.
    fn commit(&self, opts: &Options, message: &str) -> Result<()>;

    fn push(&self, opts: &Options, remote: Option<&str>, branch: Option<&str>) -> Result<()>;

    fn pull(&self, opts: &Options, remote: Option<&str>, branch: Option<&str>) -> Result<()>;

    fn add_remote(&self, opts: &Options, name: &str, url: &str) -> Result<()>;

    fn remove_remote(&self, opts: &Options, name: &str) -> Result<()>;

    /// Raw status output.
    fn status(&self, opts: &Options) -> Result<Vec<u8>>;

    /// History of a store-relative path, newest first.
    fn revisions(&self, opts: &Options, name: &str) -> Result<Vec<Revision>>;

    /// Contents of a path at a given revision.
    fn get_revision(&self, opts: &Options, name: &str, revision: &str) -> Result<Vec<u8>>;

    /// Repack repository storage.
    fn compact(&self, opts: &Options) -> Result<()>;

    /// Set the author identity used for commits.
    fn init_config(&self, opts: &Options, name: &str, email: &str) -> Result<()>;
}

/// Downgrade soft versioning failures to a log line.
///
/// Missing repositories, missing remotes and empty commits never fail a
/// store operation.
pub fn soften(result: Result<()>, what: &str) -> Result<()> {
    match result {
        Err(Error::Rcs(e)) if e.is_soft() => {
            debug!(operation = what, reason = %e, "versioning skipped");
            Ok(())
        }
        Err(e) => {
            warn!(operation = what, error = %e, "versioning failed");
            Err(e)
        }
        ok => ok,
    }
}

/// Commit then push, tolerating soft failures.
pub fn commit_and_push(rcs: &dyn Rcs, opts: &Options, message: &str) -> Result<()> {
    soften(rcs.commit(opts, message), "commit")?;
    soften(rcs.push(opts, None, None), "push")
}
