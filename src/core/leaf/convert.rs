//! Conversion to another crypto or storage backend.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::Leaf;
use crate::core::cipher::{CryptoBackend, Registry};
use crate::core::context::Options;
use crate::core::domain::Revision;
use crate::core::storage::StorageBackend;
use crate::error::{Result, StoreError};

/// `<dir><suffix>` next to `path`.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Commit message replaying one historical revision.
fn replay_message(rev: &Revision) -> String {
    format!(
        "{}\n{}\nCommitted as: {}\nDate: {}\nAuthor: {} <{}>",
        rev.subject,
        rev.body,
        rev.hash,
        rev.date.to_rfc3339(),
        rev.author,
        rev.email,
    )
}

impl Leaf {
    /// Copy this store into a new one using `crypto` and `storage`.
    ///
    /// The new store is built at `<path>-autoconvert` and initialized for
    /// `recipients`, or for the current root recipients when that is
    /// empty. Secrets with more than one revision are replayed oldest
    /// first, keeping subject and author date of every revision. With
    /// `replace`, this store moves to `<path>-backup` and the new one
    /// takes its place.
    ///
    /// Returns the converted store at its final location.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the conversion or backup
    /// directory is already there. Nothing is renamed unless every secret
    /// was converted.
    pub fn convert(
        &self,
        opts: &Options,
        crypto: CryptoBackend,
        storage: StorageBackend,
        registry: &Registry,
        recipients: &[String],
        replace: bool,
    ) -> Result<Leaf> {
        let target = sibling(self.path(), "-autoconvert");
        let backup = sibling(self.path(), "-backup");
        if target.exists() {
            return Err(StoreError::AlreadyExists(target.display().to_string()).into());
        }
        if replace && backup.exists() {
            return Err(StoreError::AlreadyExists(backup.display().to_string()).into());
        }

        let ids = if recipients.is_empty() {
            self.get_recipients(opts, "")?.ids()
        } else {
            recipients.to_vec()
        };
        let convert_opts = Options {
            queue: None,
            ..opts.with_no_network(true)
        };
        let converted = Leaf::create(
            &convert_opts,
            &self.alias,
            &target,
            storage,
            crypto,
            registry,
            &ids,
        )?;
        debug!(
            alias = %self.alias,
            target = %target.display(),
            crypto = crypto.name(),
            storage = storage.name(),
            "created conversion target"
        );

        let entries = self.list(opts, "")?;
        for name in &entries {
            opts.check_cancelled()?;
            let revs = self.revisions(opts, name)?;
            if revs.len() < 2 {
                let secret = self.get(opts, name)?;
                converted.set(&convert_opts, name, &secret)?;
            } else {
                for rev in revs.iter().rev() {
                    debug!(name = %name, revision = %rev.hash, "replaying revision");
                    let secret = self.get_revision(opts, name, &rev.hash)?;
                    let rev_opts = Options {
                        commit_timestamp: Some(rev.date),
                        ..convert_opts.with_commit_message(replay_message(rev))
                    };
                    converted.set(&rev_opts, name, &secret)?;
                }
            }
            opts.progress();
        }

        if !replace {
            info!(alias = %self.alias, entries = entries.len(), path = %target.display(), "converted store");
            return Ok(converted);
        }

        let hash = converted.recipients_hash();
        drop(converted);
        fs::rename(self.path(), &backup)?;
        fs::rename(&target, self.path())?;
        let leaf = Leaf::new(&self.alias, storage.open(self.path())?, registry.get(crypto)?);
        leaf.set_recipients_hash(hash);
        info!(
            alias = %self.alias,
            entries = entries.len(),
            backup = %backup.display(),
            "replaced store with converted copy"
        );
        Ok(leaf)
    }
}
