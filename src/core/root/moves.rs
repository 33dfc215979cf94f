//! Copy, move, delete and prune across mounts.
//!
//! Directory sources follow rsync rules: `a/` means the contents of `a`,
//! `a` means the directory itself. A destination that exists as a folder,
//! ends in `/`, or is the store root receives the source inside it.

use std::sync::Arc;

use tracing::{debug, info};

use super::Root;
use crate::core::context::Options;
use crate::core::leaf::Leaf;
use crate::core::rcs;
use crate::core::validation;
use crate::error::{Result, StorageError, StoreError};

/// Where one source entry lands.
fn destination(entry: &str, from: &str, to: &str, src_is_dir: bool, dst_is_dir: bool) -> String {
    let to = to.trim_matches('/');
    if !src_is_dir {
        return if dst_is_dir {
            validation::join(to, validation::basename(entry))
        } else {
            to.to_string()
        };
    }

    let base = from.trim_matches('/');
    let rel = entry
        .strip_prefix(base)
        .unwrap_or(entry)
        .trim_start_matches('/');
    if from.ends_with('/') || !dst_is_dir {
        validation::join(to, rel)
    } else {
        validation::join(&validation::join(to, validation::basename(base)), rel)
    }
}

impl Root {
    /// Copy a secret or folder. Every entry is re-encrypted for the
    /// recipients governing its destination.
    pub fn copy(&self, opts: &Options, from: &str, to: &str) -> Result<()> {
        self.transfer(opts, from, to, false)
    }

    /// Move a secret or folder, possibly into another mount.
    pub fn move_secret(&self, opts: &Options, from: &str, to: &str) -> Result<()> {
        self.transfer(opts, from, to, true)
    }

    fn transfer(&self, opts: &Options, from: &str, to: &str, remove: bool) -> Result<()> {
        let src_is_dir = self.is_dir(opts, from) && !self.exists(opts, from);
        let dst_is_dir = self.is_dir(opts, to) || to.ends_with('/') || to.trim_matches('/').is_empty();

        if src_is_dir && self.exists(opts, to) && !self.is_dir(opts, to) {
            return Err(StoreError::DestinationIsFile {
                from: from.to_string(),
                to: to.to_string(),
            }
            .into());
        }

        let entries = if src_is_dir {
            let base = from.trim_matches('/');
            self.list(opts)?
                .into_iter()
                .filter(|name| {
                    name.strip_prefix(base)
                        .is_some_and(|rest| base.is_empty() || rest.starts_with('/'))
                })
                .collect()
        } else {
            vec![from.trim_matches('/').to_string()]
        };
        if entries.is_empty() {
            return Err(StorageError::NotFound(from.to_string()).into());
        }

        let entry_opts = opts.with_git_commit(false);
        let mut touched: Vec<&Arc<Leaf>> = Vec::new();
        for entry in &entries {
            opts.check_cancelled()?;
            let dst = destination(entry, from, to, src_is_dir, dst_is_dir);
            if *entry == dst {
                debug!(entry = %entry, "source equals destination, skipping");
                continue;
            }
            debug!(from = %entry, to = %dst, remove, "transferring entry");

            let (src_leaf, src_rel) = self.get_store(entry);
            let (dst_leaf, dst_rel) = self.get_store(&dst);
            if dst_rel.is_empty() {
                return Err(StoreError::MountPoint(dst).into());
            }
            if Arc::ptr_eq(src_leaf, dst_leaf) {
                if remove {
                    src_leaf.move_secret(&entry_opts, &src_rel, &dst_rel)?;
                } else {
                    src_leaf.copy(&entry_opts, &src_rel, &dst_rel)?;
                }
            } else {
                let secret = src_leaf.get(opts, &src_rel)?;
                dst_leaf.set(&entry_opts, &dst_rel, &secret)?;
                if remove {
                    src_leaf.delete(&entry_opts, &src_rel)?;
                }
            }
            for leaf in [src_leaf, dst_leaf] {
                if !touched.iter().any(|t| Arc::ptr_eq(t, leaf)) {
                    touched.push(leaf);
                }
            }
        }

        if opts.git_commit && !opts.no_git_ops {
            let message = if !opts.commit_message.is_empty() {
                opts.commit_message.clone()
            } else if remove {
                format!("Move from {from} to {to}")
            } else {
                format!("Copied from {from} to {to}")
            };
            for leaf in &touched {
                rcs::commit_and_push(leaf.storage().rcs(), opts, &message)?;
            }
        }
        info!(from, to, entries = entries.len(), remove, "transfer finished");
        Ok(())
    }

    /// Remove one secret.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::MountPoint` when `name` is a mount alias.
    pub fn delete(&self, opts: &Options, name: &str) -> Result<()> {
        let (leaf, rel) = self.get_store(name);
        if rel.is_empty() {
            return Err(StoreError::MountPoint(leaf.alias().to_string()).into());
        }
        leaf.delete(opts, &rel)
    }

    /// Remove a folder and everything below it.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::PruneMount` if any mount alias starts with
    /// `prefix`, even off a segment boundary: `misc` is refused while
    /// `miscshop` is mounted.
    pub fn prune(&self, opts: &Options, prefix: &str) -> Result<()> {
        let prefix = validation::clean(prefix)?;
        if let Some(mount) = self
            .mounts
            .keys()
            .find(|alias| alias.starts_with(prefix.as_str()))
        {
            return Err(StoreError::PruneMount {
                prefix,
                mount: mount.clone(),
            }
            .into());
        }
        let (leaf, rel) = self.get_store(&prefix);
        leaf.prune(opts, &rel)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use crate::core::domain::Secret;
    use crate::error::Error;
    use tempfile::TempDir;

    #[test]
    fn test_destination() {
        assert_eq!(destination("a", "a", "b", false, false), "b");
        assert_eq!(destination("a", "a", "b", false, true), "b/a");
        assert_eq!(destination("a/f1", "a", "b", true, true), "b/a/f1");
        assert_eq!(destination("a/f1", "a/", "b", true, true), "b/f1");
        assert_eq!(destination("a/f1", "a", "b", true, false), "b/f1");
        assert_eq!(destination("a/f1", "a/", "/", true, true), "f1");
    }

    #[test]
    fn test_move_sequence() {
        let (_dir, root) = populated();
        let opts = Options::default();

        let err = root.move_secret(&opts, "foo/", "misc/zab").unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::DestinationIsFile { .. })));
        assert!(root.move_secret(&opts, "foo", "misc/zab").is_err());

        let steps: [(&str, &str, &[&str]); 6] = [
            ("foo", "misc", &["misc/foo/bar", "misc/foo/baz", "misc/zab"]),
            ("misc/foo", "bar/", &["bar/foo/bar", "bar/foo/baz", "misc/zab"]),
            ("misc/zab", "bar/foo/zab", &["bar/foo/bar", "bar/foo/baz", "bar/foo/zab"]),
            ("bar/foo/", "baz", &["baz/bar", "baz/baz", "baz/zab"]),
            ("baz/", "boz/", &["boz/bar", "boz/baz", "boz/zab"]),
            ("boz/", "/", &["bar", "baz", "zab"]),
        ];
        for (from, to, want) in steps {
            root.move_secret(&opts, from, to).unwrap();
            assert_eq!(root.list(&opts).unwrap(), want, "move {from} {to}");
        }
        assert_eq!(root.get(&opts, "zab").unwrap().bytes(), b"misc/zab");
    }

    #[test]
    fn test_copy_sequence() {
        let (_dir, root) = populated();
        let opts = Options::default();
        assert!(root.copy(&opts, "foo/", "misc/zab").is_err());

        root.copy(&opts, "foo", "misc").unwrap();
        assert_eq!(
            root.list(&opts).unwrap(),
            vec!["foo/bar", "foo/baz", "misc/foo/bar", "misc/foo/baz", "misc/zab"]
        );
        root.copy(&opts, "misc/foo/", "bar/").unwrap();
        assert_eq!(
            root.list(&opts).unwrap(),
            vec![
                "bar/bar",
                "bar/baz",
                "foo/bar",
                "foo/baz",
                "misc/foo/bar",
                "misc/foo/baz",
                "misc/zab"
            ]
        );
        assert_eq!(root.get(&opts, "bar/baz").unwrap().bytes(), b"foo/baz");
    }

    #[test]
    fn test_move_across_mounts() {
        let (_dir, mut root) = populated();
        let opts = Options::default();
        let work = TempDir::new().unwrap();
        root.add_mount(&opts, "work", work.path(), &[PLAIN_ID.to_string()])
            .unwrap();

        root.move_secret(&opts, "misc/zab", "work/zab").unwrap();
        assert!(!root.exists(&opts, "misc/zab"));
        assert_eq!(root.get(&opts, "work/zab").unwrap().bytes(), b"misc/zab");
        assert!(work.path().join("zab.txt").exists());

        root.copy(&opts, "foo", "work").unwrap();
        assert_eq!(
            root.list(&opts).unwrap(),
            vec!["foo/bar", "foo/baz", "work/foo/bar", "work/foo/baz", "work/zab"]
        );
    }

    #[test]
    fn test_delete_and_prune_respect_mounts() {
        let (_dir, mut root) = populated();
        let opts = Options::default();
        let work = TempDir::new().unwrap();
        root.add_mount(&opts, "misc/work", work.path(), &[PLAIN_ID.to_string()])
            .unwrap();
        root.set(&opts, "misc/work/secret", &Secret::from("pw")).unwrap();

        let err = root.delete(&opts, "misc/work").unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::MountPoint(_))));
        let err = root.prune(&opts, "misc").unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::PruneMount { .. })));

        root.delete(&opts, "misc/work/secret").unwrap();
        root.prune(&opts, "foo").unwrap();
        assert_eq!(root.list(&opts).unwrap(), vec!["misc/zab"]);
    }

    #[test]
    fn test_prune_refuses_alias_sharing_prefix() {
        let (_dir, mut root) = populated();
        let opts = Options::default();
        let shop = TempDir::new().unwrap();
        root.add_mount(&opts, "miscshop", shop.path(), &[PLAIN_ID.to_string()])
            .unwrap();

        let err = root.prune(&opts, "misc").unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::PruneMount { .. })));
        let err = root.prune(&opts, "").unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::PruneMount { .. })));
        assert!(root.exists(&opts, "misc/zab"));

        root.prune(&opts, "foo").unwrap();
        assert_eq!(root.list(&opts).unwrap(), vec!["misc/zab"]);
    }
}
