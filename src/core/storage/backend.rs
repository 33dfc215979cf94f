//! Storage backend selection.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use super::{Fs, Storage};
use crate::core::context::Options;
use crate::core::rcs::{Git, Noop};
use crate::error::Result;

/// Known storage backends.
///
/// - `Fs`: plain directory, no versioning
/// - `GitFs`: directory that is also a git repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageBackend {
    Fs,
    GitFs,
}

impl StorageBackend {
    /// Pick a backend by inspecting the store root.
    pub fn detect(path: &Path) -> Self {
        if path.join(".git").exists() {
            Self::GitFs
        } else {
            Self::Fs
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Fs => "fs",
            Self::GitFs => "gitfs",
        }
    }

    /// Instantiate the backend over an existing directory.
    pub fn open(self, path: &Path) -> Result<Arc<dyn Storage>> {
        debug!(backend = self.name(), path = %path.display(), "opening storage");
        let storage: Arc<dyn Storage> = match self {
            Self::Fs => Arc::new(Fs::new(path)),
            Self::GitFs => Arc::new(Fs::with_rcs(path, Box::new(Git::open(path)))),
        };
        Ok(storage)
    }

    /// Create the backend's on-disk state and open it.
    ///
    /// For `GitFs` this runs `git init` and configures the author.
    pub fn init(self, opts: &Options, path: &Path) -> Result<Arc<dyn Storage>> {
        let storage: Arc<dyn Storage> = match self {
            Self::Fs => {
                let fs = Fs::with_rcs(path, Box::new(Noop));
                fs.ensure_root()?;
                Arc::new(fs)
            }
            Self::GitFs => {
                let git = Git::init(opts, path)?;
                let fs = Fs::with_rcs(path, Box::new(git));
                fs.ensure_root()?;
                Arc::new(fs)
            }
        };
        Ok(storage)
    }
}
