//! Recipient list management.
//!
//! The root IDFile lists the store's recipients; an IDFile in a
//! subdirectory overrides it for everything below. Entries are canonicalized
//! through the keyring's fingerprint on read. Public keys of recipients are
//! exported to `.public-keys/<fingerprint>` so collaborators can import
//! them from the store.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use super::Leaf;
use crate::core::constants::PUBLIC_KEY_DIR;
use crate::core::context::Options;
use crate::core::domain::Recipients;
use crate::core::validation;
use crate::error::{CryptoError, ErrorKind, Result, StoreError};

impl Leaf {
    /// Recipients of the root list; empty if it can not be read.
    pub fn recipients(&self, opts: &Options) -> Vec<String> {
        match self.get_recipients(opts, "") {
            Ok(rs) => rs.ids(),
            Err(e) => {
                warn!(alias = %self.alias, error = %e, "failed to read recipient list");
                Vec::new()
            }
        }
    }

    /// Recipients governing `name`, canonicalized.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotInitialized` if the store has no root list
    /// and `StoreError::InvalidHash` when `check_recipients` is on and the
    /// root list does not match its recorded hash.
    pub fn get_recipients(&self, opts: &Options, name: &str) -> Result<Recipients> {
        let id_file = self.id_file_for(opts, name);
        let rs = self.read_recipients(opts, &id_file)?;
        Ok(Recipients::from_ids(
            rs.iter().map(|id| self.crypto.fingerprint(opts, id)),
        ))
    }

    fn read_recipients(&self, opts: &Options, id_file: &str) -> Result<Recipients> {
        let is_root = id_file == self.crypto.id_file();
        let buf = match self.storage.get(opts, id_file) {
            Err(e) if e.is_not_found() && is_root => {
                return Err(StoreError::NotInitialized(self.path().display().to_string()).into())
            }
            other => other?,
        };
        let rs = Recipients::parse(&buf);

        if opts.check_recipients && is_root {
            if let Some(expected) = self.recipients_hash() {
                let actual = rs.hash();
                if actual != expected {
                    warn!(alias = %self.alias, %expected, %actual, "recipient list hash mismatch");
                    return Err(StoreError::InvalidHash {
                        alias: self.alias.clone(),
                    }
                    .into());
                }
            }
        }
        Ok(rs)
    }

    /// Every recipient list in the store keyed by directory (`""` for the
    /// root). Subdirectory lists equal to the root list are omitted.
    pub fn recipients_tree(&self, opts: &Options) -> Result<BTreeMap<String, Vec<String>>> {
        let id_file = self.crypto.id_file();
        let root = self.get_recipients(opts, "")?.ids();
        let mut tree = BTreeMap::new();

        for entry in self.storage.list(opts, "")? {
            if validation::basename(&entry) != id_file {
                continue;
            }
            let dir = validation::parent(&entry);
            if dir.is_empty() {
                continue;
            }
            let ids = match self.read_recipients(opts, &entry) {
                Ok(rs) => self.fingerprints(opts, rs.iter()),
                Err(e) => {
                    debug!(list = %entry, error = %e, "skipping unreadable recipient list");
                    continue;
                }
            };
            if ids != root {
                tree.insert(dir.to_string(), ids);
            }
        }
        tree.insert(String::new(), root);
        Ok(tree)
    }

    /// Our identity used to keep secrets self-decryptable: the first root
    /// recipient we hold a private key for, else our first identity.
    pub fn our_key_id(&self, opts: &Options) -> Option<String> {
        let roots = self
            .storage
            .get(opts, self.crypto.id_file())
            .map(|buf| Recipients::parse(&buf).ids())
            .unwrap_or_default();
        for id in roots {
            if let Ok(found) = self.crypto.find_identities(opts, &[id]) {
                if let Some(fp) = found.into_iter().next() {
                    return Some(fp);
                }
            }
        }
        self.crypto
            .list_identities(opts)
            .ok()
            .and_then(|ids| ids.into_iter().next())
    }

    /// Recipients a write to `name` encrypts for: the governing list plus
    /// our own identity.
    pub(crate) fn useable_keys(&self, opts: &Options, name: &str) -> Result<Vec<String>> {
        let mut ids = self.get_recipients(opts, name)?.ids();
        if let Some(own) = self.our_key_id(opts) {
            if !ids.contains(&own) {
                ids.push(own);
            }
        }
        Ok(ids)
    }

    /// Write the root recipient list, export public keys and commit.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::EmptyRecipients` for an empty list.
    pub(crate) fn save_recipients(
        &self,
        opts: &Options,
        rs: &Recipients,
        message: &str,
    ) -> Result<()> {
        if rs.is_empty() {
            return Err(StoreError::EmptyRecipients.into());
        }
        let id_file = self.crypto.id_file().to_string();
        match self.storage.set(opts, &id_file, &rs.serialize()) {
            Err(e) if e.kind() == ErrorKind::MeaninglessWrite => {
                debug!(alias = %self.alias, "recipient list unchanged");
            }
            other => other?,
        }
        self.set_recipients_hash(Some(rs.hash()));

        let mut paths = vec![id_file];
        if opts.export_keys {
            paths.extend(self.export_public_keys(opts, rs));
        }
        self.commit(opts, &paths, message.to_string())
    }

    /// Replace the root recipient list without re-encrypting.
    pub fn set_recipients(&self, opts: &Options, ids: &[String]) -> Result<()> {
        self.save_recipients(opts, &Recipients::from_ids(ids), "Set Recipients")
    }

    /// Export the public key of every recipient into `.public-keys/`.
    /// Returns the paths written; failures are logged and skipped.
    pub fn export_public_keys(&self, opts: &Options, rs: &Recipients) -> Vec<String> {
        if !self.crypto.exports_public_keys() {
            debug!(crypto = self.crypto.name(), "backend does not export public keys");
            return Vec::new();
        }
        let mut written = Vec::new();
        for id in rs.iter() {
            let fp = self.crypto.fingerprint(opts, id);
            let key = match self.crypto.export_public_key(opts, &fp) {
                Ok(key) => key,
                Err(e) => {
                    warn!(recipient = %fp, error = %e, "failed to export public key");
                    continue;
                }
            };
            let path = validation::join(PUBLIC_KEY_DIR, &fp);
            match self.storage.set(opts, &path, &key) {
                Ok(()) => written.push(path),
                Err(e) if e.kind() == ErrorKind::MeaninglessWrite => {}
                Err(e) => warn!(recipient = %fp, error = %e, "failed to store public key"),
            }
        }
        written
    }

    /// Import public keys from `.public-keys/` for recipients missing from
    /// the keyring. Asks `import_cb` unless `auto_import` is on. Returns the
    /// number of keys imported.
    pub fn import_missing_public_keys(&self, opts: &Options) -> Result<usize> {
        if !self.crypto.exports_public_keys() {
            return Ok(0);
        }
        let mut imported = 0;
        for id in self.recipients(opts) {
            if !self.crypto.find_recipients(opts, &[id.clone()])?.is_empty() {
                continue;
            }
            let path = validation::join(PUBLIC_KEY_DIR, &id);
            let key = match self.storage.get(opts, &path) {
                Ok(key) => key,
                Err(e) if e.is_not_found() => {
                    debug!(recipient = %id, "no exported public key");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if !opts.auto_import {
                let names = self
                    .crypto
                    .read_names_from_key(opts, &key)
                    .unwrap_or_default();
                let approved = opts
                    .import_cb
                    .as_ref()
                    .is_some_and(|cb| cb(id.as_str(), names.as_slice()));
                if !approved {
                    debug!(recipient = %id, "public key import declined");
                    continue;
                }
            }
            self.crypto.import_public_key(opts, &key)?;
            info!(recipient = %id, "imported public key");
            imported += 1;
        }
        Ok(imported)
    }

    /// Add a recipient to the root list and re-encrypt the store for it.
    ///
    /// Adding a recipient that is already listed only re-encrypts, and only
    /// after confirmation.
    pub fn add_recipient(&self, opts: &Options, id: &str) -> Result<()> {
        let mut rs = self.get_recipients(opts, "")?;
        let fp = self.crypto.fingerprint(opts, id.trim());

        let message = if rs.contains(&fp) {
            let prompt = format!("key {fp} already in store. Re-encrypt with its public key?");
            if !opts.confirm(&prompt) {
                return Ok(());
            }
            format!("Re-encrypted Store for Recipient {fp}")
        } else {
            rs.add(&fp);
            let message = format!("Added Recipient {fp}");
            self.save_recipients(opts, &rs, &message)?;
            message
        };

        info!(alias = %self.alias, recipient = %fp, "re-encrypting store");
        self.reencrypt(&opts.with_commit_message(message.clone()), "", &message)
    }

    /// Remove a recipient from the root list and re-encrypt the store
    /// without it.
    ///
    /// `id` matches a listed entry exactly, as a suffix of a listed
    /// fingerprint, or through the keyring.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::RecipientNotInStore` if nothing matches.
    pub fn remove_recipient(&self, opts: &Options, id: &str) -> Result<()> {
        let key = id.trim();
        let mut rs = self.get_recipients(opts, "")?;
        let mut removed = 0;

        for listed in rs.ids() {
            let matches = listed == key
                || key.ends_with(listed.as_str())
                || (listed.ends_with(key) && key.len() >= 8)
                || self
                    .crypto
                    .find_recipients(opts, &[listed.clone()])
                    .map(|found| found.iter().any(|f| f == key))
                    .unwrap_or(false);
            if matches && rs.remove(&listed) {
                debug!(recipient = %listed, "removing recipient");
                removed += 1;
            }
        }
        if removed == 0 {
            return Err(StoreError::RecipientNotInStore(key.to_string()).into());
        }

        let message = format!("Removed Recipient {key}");
        self.save_recipients(opts, &rs, &message)?;
        info!(alias = %self.alias, recipient = %key, "re-encrypting store");
        self.reencrypt(&opts.with_commit_message(message.clone()), "", &message)
    }

    /// Write the root recipient list of a new store.
    ///
    /// Every id is resolved through the keyring; ids without a known
    /// public key are skipped.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` for an initialized store,
    /// `CryptoError::KeyNotFound` if no id resolves and
    /// `CryptoError::NoIdentity` if we hold none of the private keys.
    pub fn init(&self, opts: &Options, ids: &[String]) -> Result<()> {
        if self.is_initialized(opts) {
            return Err(StoreError::AlreadyExists(self.path().display().to_string()).into());
        }

        let mut rs = Recipients::new();
        for id in ids.iter().map(|id| id.trim()).filter(|id| !id.is_empty()) {
            match self.crypto.find_recipients(opts, &[id.to_string()]) {
                Ok(found) => match found.into_iter().next() {
                    Some(fp) => {
                        rs.add(fp);
                    }
                    None => warn!(recipient = id, "no public key found, skipping"),
                },
                Err(e) => warn!(recipient = id, error = %e, "key lookup failed, skipping"),
            }
        }
        if rs.is_empty() {
            return Err(CryptoError::KeyNotFound(ids.join(", ")).into());
        }
        if self.crypto.find_identities(opts, &rs.ids())?.is_empty() {
            return Err(CryptoError::NoIdentity.into());
        }

        let message = format!("Initialized Store for {}", rs.ids().join(", "));
        self.save_recipients(opts, &rs, &message)?;
        info!(alias = %self.alias, path = %self.path().display(), "initialized store");
        Ok(())
    }
}
