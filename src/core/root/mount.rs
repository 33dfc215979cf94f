//! Mount table management.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use super::Root;
use crate::core::cipher::CryptoBackend;
use crate::core::context::Options;
use crate::core::leaf::Leaf;
use crate::core::storage::StorageBackend;
use crate::core::validation;
use crate::error::{Result, StoreError};

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

impl Root {
    /// Mount the store at `path` under `alias`.
    ///
    /// An uninitialized directory is initialized for `keys` with the
    /// default crypto backend.
    ///
    /// # Errors
    ///
    /// - `StoreError::AlreadyMounted` if `alias` is taken
    /// - `StoreError::DuplicatePath` if `path` is already the root or a mount
    /// - `StoreError::NotInitialized` if the store is new and `keys` is empty
    pub fn add_mount(&mut self, opts: &Options, alias: &str, path: &Path, keys: &[String]) -> Result<()> {
        let alias = validation::clean(alias)?;
        if alias.is_empty() {
            return Err(StoreError::InvalidName {
                name: alias,
                reason: "mount alias must not be empty".to_string(),
            }
            .into());
        }
        if self.mounts.contains_key(&alias) {
            return Err(StoreError::AlreadyMounted(alias).into());
        }

        let wanted = canonical(path);
        if canonical(self.store.path()) == wanted {
            return Err(StoreError::DuplicatePath {
                path: path.display().to_string(),
                alias: String::new(),
            }
            .into());
        }
        if let Some((other, _)) = self
            .mounts
            .iter()
            .find(|(_, leaf)| canonical(leaf.path()) == wanted)
        {
            return Err(StoreError::DuplicatePath {
                path: path.display().to_string(),
                alias: other.clone(),
            }
            .into());
        }

        let leaf = Leaf::open(opts, &alias, path, &self.registry)?;
        let leaf = if leaf.is_initialized(opts) {
            leaf
        } else {
            if keys.is_empty() {
                return Err(StoreError::NotInitialized(alias).into());
            }
            debug!(alias = %alias, path = %path.display(), "initializing new mount");
            Leaf::create(
                opts,
                &alias,
                path,
                StorageBackend::detect(path),
                self.registry.settings().default,
                &self.registry,
                keys,
            )?
        };

        info!(alias = %alias, path = %path.display(), "mounted store");
        self.mounts.insert(alias, Arc::new(leaf));
        Ok(())
    }

    /// Unmount `alias`. The store on disk is left alone.
    pub fn remove_mount(&mut self, alias: &str) -> Result<()> {
        let alias = validation::clean(alias)?;
        match self.mounts.remove(&alias) {
            Some(leaf) => {
                info!(alias = %alias, path = %leaf.path().display(), "unmounted store");
                Ok(())
            }
            None => Err(StoreError::NotMounted(alias).into()),
        }
    }

    /// Convert the leaf at `alias` to other backends.
    ///
    /// With `replace` the converted store takes over the leaf's path and
    /// its place in the mount table. Otherwise the copy is left at
    /// `<path>-autoconvert` and the mount table is unchanged. Returns the
    /// path of the converted store.
    pub fn convert(
        &mut self,
        opts: &Options,
        alias: &str,
        crypto: CryptoBackend,
        storage: StorageBackend,
        recipients: &[String],
        replace: bool,
    ) -> Result<PathBuf> {
        let alias = validation::clean(alias)?;
        let converted = self
            .get_sub_store(&alias)?
            .convert(opts, crypto, storage, &self.registry, recipients, replace)?;
        let path = converted.path().to_path_buf();
        if !replace {
            return Ok(path);
        }

        let converted = Arc::new(converted);
        if alias.is_empty() {
            self.store = converted;
        } else {
            self.mounts.insert(alias.clone(), converted);
        }
        info!(alias = %alias, crypto = crypto.name(), storage = storage.name(), "swapped in converted store");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use crate::core::cipher::CryptoBackend;
    use crate::core::context::Options;
    use crate::core::domain::Secret;
    use crate::core::storage::StorageBackend;
    use crate::error::{Error, StoreError};
    use tempfile::TempDir;

    #[test]
    fn test_add_and_remove_mount() {
        let (_dir, mut root) = populated();
        let opts = Options::default();
        let sub = TempDir::new().unwrap();
        root.add_mount(&opts, "/sub/", sub.path(), &[PLAIN_ID.to_string()])
            .unwrap();
        assert!(root.mounts().contains_key("sub"));
        assert!(root.get_sub_store("sub").unwrap().is_initialized(&opts));

        root.remove_mount("sub").unwrap();
        assert!(root.mounts().is_empty());
        assert!(matches!(
            root.remove_mount("sub").unwrap_err(),
            Error::Store(StoreError::NotMounted(_))
        ));
    }

    #[test]
    fn test_mount_errors() {
        let (dir, mut root) = populated();
        let opts = Options::default();
        let sub = TempDir::new().unwrap();
        let keys = [PLAIN_ID.to_string()];

        let err = root.add_mount(&opts, "new", sub.path(), &[]).unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::NotInitialized(_))));

        root.add_mount(&opts, "sub", sub.path(), &keys).unwrap();
        let err = root.add_mount(&opts, "sub", sub.path(), &keys).unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::AlreadyMounted(_))));

        let err = root.add_mount(&opts, "other", sub.path(), &keys).unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::DuplicatePath { .. })));

        let err = root.add_mount(&opts, "self", dir.path(), &keys).unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::DuplicatePath { .. })));
    }

    #[test]
    fn test_existing_store_mounts_without_keys() {
        let (_dir, mut root) = populated();
        let opts = Options::default();
        let sub = TempDir::new().unwrap();
        plain_leaf("", &sub);
        root.add_mount(&opts, "team", sub.path(), &[]).unwrap();
        assert_eq!(root.recipients(&opts, "team").unwrap(), vec![PLAIN_ID]);
    }

    #[test]
    fn test_convert_mount_in_place() {
        let (_dir, mut root) = populated();
        let opts = Options::default();
        let parent = TempDir::new().unwrap();
        let path = parent.path().join("team");
        std::fs::create_dir_all(&path).unwrap();
        root.add_mount(&opts, "team", &path, &[PLAIN_ID.to_string()])
            .unwrap();
        root.set(&opts, "team/db", &Secret::from("s3cret")).unwrap();

        let converted = root
            .convert(&opts, "team", CryptoBackend::Plain, StorageBackend::Fs, &[], true)
            .unwrap();
        assert_eq!(converted, path);
        assert!(parent.path().join("team-backup/db.txt").exists());
        assert_eq!(root.get(&opts, "team/db").unwrap().bytes(), b"s3cret");
        assert_eq!(root.mounts()["team"], path);

        let err = root
            .convert(&opts, "nope", CryptoBackend::Plain, StorageBackend::Fs, &[], true)
            .unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::NotMounted(_))));
    }
}
