//! Secret operations.
//!
//! Read, write, copy, move, delete and link entries of a leaf store.

use tracing::{debug, trace};

use super::Leaf;
use crate::core::context::Options;
use crate::core::domain::Secret;
use crate::core::validation;
use crate::error::{ErrorKind, Result, SecretError, StorageError, StoreError};

impl Leaf {
    /// Decrypt and parse a secret.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the secret does not exist,
    /// `CryptoError::Decrypt` if no held key can open it and
    /// `SecretError::Empty` if the plaintext is zero bytes.
    pub fn get(&self, opts: &Options, name: &str) -> Result<Secret> {
        let name = validation::validate_name(name)?;
        let ciphertext = self.storage.get(opts, &self.secret_path(&name))?;
        self.decode(opts, &name, &ciphertext)
    }

    pub(crate) fn decode(&self, opts: &Options, name: &str, ciphertext: &[u8]) -> Result<Secret> {
        let plaintext = self.crypto.decrypt(opts, ciphertext)?;
        if plaintext.is_empty() {
            return Err(SecretError::Empty.into());
        }
        trace!(alias = %self.alias, name, bytes = plaintext.len(), "decrypted secret");
        Ok(Secret::new(plaintext.to_vec()))
    }

    /// Encrypt `secret` for the recipients governing `name` and write it.
    ///
    /// Our own key is always among the recipients. A write that leaves the
    /// ciphertext unchanged succeeds without a commit.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidName` or `StorageError::Sneaky` for bad
    /// names and `CryptoError::Encrypt` if the recipients can not be used.
    pub fn set(&self, opts: &Options, name: &str, secret: &Secret) -> Result<()> {
        let name = validation::validate_name(name)?;
        let path = self.secret_path(&name);
        let recipients = self.useable_keys(opts, &name)?;
        let ciphertext = self.crypto.encrypt(opts, secret.bytes(), &recipients)?;

        match self.storage.set(opts, &path, &ciphertext) {
            Err(e) if e.kind() == ErrorKind::MeaninglessWrite => {
                debug!(alias = %self.alias, name = %name, "content unchanged, nothing to commit");
                return Ok(());
            }
            other => other?,
        }
        debug!(
            alias = %self.alias,
            name = %name,
            recipients = recipients.len(),
            "saved secret"
        );

        self.commit(
            opts,
            &[path],
            format!("Save secret to {}: {}", name, opts.commit_message),
        )
    }

    /// Fail with `IsDirectory` when `name` is a folder and not a secret.
    fn ensure_file(&self, opts: &Options, name: &str) -> Result<()> {
        if !self.exists(opts, name) && self.is_dir(opts, name) {
            return Err(StoreError::IsDirectory(name.to_string()).into());
        }
        Ok(())
    }

    /// Copy one secret, re-encrypting it for the destination's recipients.
    pub fn copy(&self, opts: &Options, from: &str, to: &str) -> Result<()> {
        let from = validation::validate_name(from)?;
        let to = validation::validate_name(to)?;
        self.ensure_file(opts, &from)?;
        let secret = self.get(opts, &from)?;
        self.set(
            &opts.with_commit_message(format!("Copied from {from} to {to}")),
            &to,
            &secret,
        )
    }

    /// Move one secret. The copy and the removal land in one commit.
    pub fn move_secret(&self, opts: &Options, from: &str, to: &str) -> Result<()> {
        let from = validation::validate_name(from)?;
        let to = validation::validate_name(to)?;
        self.ensure_file(opts, &from)?;
        let secret = self.get(opts, &from)?;
        self.set(&opts.with_git_commit(false), &to, &secret)?;

        let from_path = self.secret_path(&from);
        self.storage.delete(opts, &from_path)?;
        self.commit(
            opts,
            &[from_path, self.secret_path(&to)],
            format!("Move from {from} to {to}"),
        )
    }

    /// Remove one secret.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the secret does not exist.
    pub fn delete(&self, opts: &Options, name: &str) -> Result<()> {
        let name = validation::validate_name(name)?;
        let path = self.secret_path(&name);
        self.storage.delete(opts, &path)?;
        self.commit(opts, &[path], format!("Remove {name} from store."))
    }

    /// Remove a folder and everything below it, or a single secret of that
    /// name. Nothing to remove is not an error.
    pub fn prune(&self, opts: &Options, prefix: &str) -> Result<()> {
        let prefix = validation::validate_name(prefix)?;
        let mut removed = Vec::new();

        match self.storage.prune(opts, &prefix) {
            Ok(()) => removed.push(prefix.clone()),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        let file = self.secret_path(&prefix);
        match self.storage.delete(opts, &file) {
            Ok(()) => removed.push(file),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        if removed.is_empty() {
            debug!(alias = %self.alias, prefix = %prefix, "nothing to prune");
            return Ok(());
        }
        self.commit(opts, &removed, format!("Remove {prefix} from store."))
    }

    /// Create `to` as a relative symlink to the secret `from`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if `from` is missing and
    /// `StoreError::AlreadyExists` if `to` is taken.
    pub fn link(&self, opts: &Options, from: &str, to: &str) -> Result<()> {
        let from = validation::validate_name(from)?;
        let to = validation::validate_name(to)?;
        if !self.exists(opts, &from) {
            return Err(StorageError::NotFound(from).into());
        }
        if self.exists(opts, &to) {
            return Err(StoreError::AlreadyExists(to).into());
        }
        let dst = self.secret_path(&to);
        self.storage.link(opts, &self.secret_path(&from), &dst)?;
        self.commit(opts, &[dst], format!("Symlinked {from} to {to}"))
    }
}
