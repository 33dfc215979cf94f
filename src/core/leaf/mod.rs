//! Leaf store: one on-disk store.
//!
//! A leaf combines one [`Storage`] (with its versioning backend) and one
//! [`Crypto`] backend. Secrets live at `<name>.<ext>`; recipient lists are
//! the backend's IDFile at the store root or in any subdirectory, and the
//! deepest one above a secret governs it.
//!
//! Operations are split across submodules, each adding an `impl Leaf`
//! block:
//!
//! - `secrets`: get, set, copy, move, delete, prune, link
//! - `recipients`: recipient lists, key export and import, init
//! - `reencrypt`: bulk re-encryption worker pool
//! - `templates`: `.pass-template` files
//! - `fsck`: consistency checks and recipient repair
//! - `convert`: copy into a store with other backends

mod convert;
mod fsck;
mod recipients;
mod reencrypt;
mod secrets;
mod templates;

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::core::cipher::{Crypto, CryptoBackend, Registry};
use crate::core::constants::MAX_PARENT_WALK;
use crate::core::context::Options;
use crate::core::domain::Revision;
use crate::core::queue;
use crate::core::rcs;
use crate::core::storage::{self, Storage, StorageBackend};
use crate::core::types::Fingerprint;
use crate::core::validation;
use crate::error::{CryptoError, Error, Result};

/// A single store.
pub struct Leaf {
    alias: String,
    storage: Arc<dyn Storage>,
    crypto: Arc<dyn Crypto>,
    /// Recorded hash of the root recipient list.
    recipients_hash: Mutex<Option<String>>,
}

impl fmt::Debug for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Leaf")
            .field("alias", &self.alias)
            .field("path", &self.storage.path())
            .field("storage", &self.storage.name())
            .field("crypto", &self.crypto.name())
            .finish()
    }
}

impl Leaf {
    pub fn new(alias: &str, storage: Arc<dyn Storage>, crypto: Arc<dyn Crypto>) -> Self {
        Self {
            alias: alias.to_string(),
            storage,
            crypto,
            recipients_hash: Mutex::new(None),
        }
    }

    /// Open the store at `path`, detecting storage and crypto backends.
    ///
    /// A directory without any recipient list opens with the registry's
    /// default backend and reports `is_initialized() == false`.
    pub fn open(opts: &Options, alias: &str, path: &Path, registry: &Registry) -> Result<Self> {
        let storage = storage::open(path)?;
        let backend = registry.detect(opts, storage.as_ref());
        let crypto = registry.get(backend)?;
        debug!(
            alias,
            path = %path.display(),
            storage = storage.name(),
            crypto = crypto.name(),
            "opened leaf store"
        );
        Ok(Self::new(alias, storage, crypto))
    }

    /// Create a fresh store at `path` and initialize it for `recipients`.
    ///
    /// # Errors
    ///
    /// Fails if the directory already holds a store, if none of the
    /// recipients resolve to a known key, or if storage setup fails.
    pub fn create(
        opts: &Options,
        alias: &str,
        path: &Path,
        storage: StorageBackend,
        crypto: CryptoBackend,
        registry: &Registry,
        recipients: &[String],
    ) -> Result<Self> {
        let storage = storage.init(opts, path)?;
        let leaf = Self::new(alias, storage, registry.get(crypto)?);
        leaf.init(opts, recipients)?;
        Ok(leaf)
    }

    /// Mount alias; empty for the root store.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn path(&self) -> &Path {
        self.storage.path()
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn crypto(&self) -> &Arc<dyn Crypto> {
        &self.crypto
    }

    /// Hash recorded for the root recipient list, if any.
    pub fn recipients_hash(&self) -> Option<String> {
        self.recipients_hash
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Record the expected hash of the root recipient list.
    pub fn set_recipients_hash(&self, hash: Option<String>) {
        *self.recipients_hash.lock().unwrap_or_else(|e| e.into_inner()) = hash;
    }

    /// Whether the root recipient list exists.
    pub fn is_initialized(&self, opts: &Options) -> bool {
        self.storage.exists(opts, self.crypto.id_file())
    }

    /// Ciphertext path of a secret.
    pub(crate) fn secret_path(&self, name: &str) -> String {
        format!("{}.{}", name, self.crypto.ext())
    }

    /// Secret names under `prefix`, sorted, without extension.
    ///
    /// `prefix` matches whole segments: `foo` covers `foo` and `foo/bar`
    /// but not `foobar`.
    pub fn list(&self, opts: &Options, prefix: &str) -> Result<Vec<String>> {
        let prefix = validation::clean(prefix)?;
        let suffix = format!(".{}", self.crypto.ext());
        let names: Vec<String> = self
            .storage
            .list(opts, &prefix)?
            .into_iter()
            .filter_map(|entry| entry.strip_suffix(&suffix).map(str::to_string))
            .filter(|name| !name.is_empty() && !validation::basename(name).is_empty())
            .filter(|name| in_scope(name, &prefix))
            .collect();
        trace!(alias = %self.alias, prefix = %prefix, entries = names.len(), "listed secrets");
        Ok(names)
    }

    /// Whether a secret exists.
    pub fn exists(&self, opts: &Options, name: &str) -> bool {
        self.storage.exists(opts, &self.secret_path(name))
    }

    /// Whether `name` is a directory.
    pub fn is_dir(&self, opts: &Options, name: &str) -> bool {
        self.storage.is_dir(opts, name)
    }

    /// Governing recipient list for `name`: the first IDFile found walking
    /// up from `name`, else the root IDFile.
    pub(crate) fn id_file_for(&self, opts: &Options, name: &str) -> String {
        let id_file = self.crypto.id_file();
        let mut dir = name.trim_matches('/');
        for _ in 0..MAX_PARENT_WALK {
            if dir.is_empty() {
                break;
            }
            let candidate = validation::join(dir, id_file);
            if self.storage.exists(opts, &candidate) {
                return candidate;
            }
            dir = validation::parent(dir);
        }
        id_file.to_string()
    }

    /// Stage `paths` and, when commits are on, queue a commit and push.
    ///
    /// Soft versioning failures (no repository, no remote, nothing to
    /// commit) are logged and swallowed.
    pub(crate) fn commit(&self, opts: &Options, paths: &[String], message: String) -> Result<()> {
        if opts.no_git_ops {
            trace!(alias = %self.alias, "skipping versioning for this call");
            return Ok(());
        }
        let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
        rcs::soften(self.storage.rcs().add(opts, &refs), "add")?;
        if !opts.git_commit {
            return Ok(());
        }

        let storage = Arc::clone(&self.storage);
        let task_opts = Options {
            queue: None,
            ..opts.clone()
        };
        queue::enqueue(
            opts,
            Box::new(move || rcs::commit_and_push(storage.rcs(), &task_opts, &message)),
        )
    }

    /// History of a secret, newest first.
    ///
    /// Stores without versioning report a single `latest` revision.
    pub fn revisions(&self, opts: &Options, name: &str) -> Result<Vec<Revision>> {
        let path = self.secret_path(&validation::validate_name(name)?);
        match self.storage.rcs().revisions(opts, &path) {
            Err(e) if e.is_soft_rcs() => Ok(vec![Revision::latest()]),
            other => other,
        }
    }

    /// Decrypted content of a secret at `revision`; `latest` is the
    /// current ciphertext.
    pub fn get_revision(
        &self,
        opts: &Options,
        name: &str,
        revision: &str,
    ) -> Result<crate::core::domain::Secret> {
        let name = validation::validate_name(name)?;
        if revision.trim() == "latest" {
            return self.get(opts, &name);
        }
        let ciphertext = self
            .storage
            .rcs()
            .get_revision(opts, &self.secret_path(&name), revision)?;
        self.decode(opts, &name, &ciphertext)
    }

    /// Canonical identities of `ids` on this leaf's keyring.
    pub(crate) fn fingerprints<'a, I>(&self, opts: &Options, ids: I) -> Vec<Fingerprint>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut out: Vec<Fingerprint> = ids
            .into_iter()
            .map(|id| self.crypto.fingerprint(opts, id))
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Recipients embedded in a stored ciphertext, canonicalized.
    pub fn recipient_ids(&self, opts: &Options, name: &str) -> Result<Vec<String>> {
        let ciphertext = self.storage.get(opts, &self.secret_path(name))?;
        let ids = self.crypto.recipient_ids(opts, &ciphertext)?;
        Ok(self.fingerprints(opts, ids.iter()))
    }
}

fn in_scope(name: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || name == prefix
        || name
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Whether an error means the backend can not answer the question asked.
pub(crate) fn is_unsupported(err: &Error) -> bool {
    matches!(err, Error::Crypto(CryptoError::Unsupported { .. }))
}
