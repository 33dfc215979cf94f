//! Filesystem storage backend.
//!
//! Entries are plain files under the store root. Writes go through a
//! temporary file in the target directory and are renamed into place;
//! everything created is owner-only (0600 files, 0700 directories).

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};
use walkdir::WalkDir;

use super::Storage;
use crate::core::constants::{DIR_MODE, FILE_MODE};
use crate::core::context::Options;
use crate::core::domain::Finding;
use crate::core::rcs::{Noop, Rcs};
use crate::core::validation;
use crate::error::{Result, StorageError, StoreError};

/// Directory-backed storage.
#[derive(Debug)]
pub struct Fs {
    root: PathBuf,
    rcs: Box<dyn Rcs>,
}

fn io_err(path: &Path, source: io::Error) -> crate::error::Error {
    StorageError::Io {
        path: path.display().to_string(),
        source,
    }
    .into()
}

/// Create a directory and its parents with owner-only permissions.
fn mkdir_all(dir: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }
    builder.create(dir).map_err(|e| io_err(dir, e))
}

#[cfg(unix)]
fn mode_of(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o777
}

#[cfg(unix)]
fn chmod(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

fn rel_string(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

impl Fs {
    /// Storage at `root` without versioning.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_rcs(root, Box::new(Noop))
    }

    /// Storage at `root` versioned by `rcs`.
    pub fn with_rcs(root: impl Into<PathBuf>, rcs: Box<dyn Rcs>) -> Self {
        Self {
            root: root.into(),
            rcs,
        }
    }

    /// Create the root directory if needed.
    pub fn ensure_root(&self) -> Result<()> {
        mkdir_all(&self.root)
    }

    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let rel = validation::clean(name)?;
        if rel.is_empty() {
            return Ok(self.root.clone());
        }
        Ok(self.root.join(rel))
    }

    /// Follow an existing symlink, refusing targets outside the root.
    fn write_target(&self, path: &Path, name: &str) -> Result<PathBuf> {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_symlink() => {
                let target = fs::canonicalize(path).map_err(|e| io_err(path, e))?;
                let root = fs::canonicalize(&self.root).map_err(|e| io_err(&self.root, e))?;
                if !target.starts_with(&root) {
                    return Err(StorageError::Sneaky(name.to_string()).into());
                }
                Ok(target)
            }
            _ => Ok(path.to_path_buf()),
        }
    }

    /// Remove empty directories from `dir` upwards, stopping at the root.
    fn remove_empty_parents(&self, dir: Option<&Path>) {
        let mut current = dir;
        while let Some(d) = current {
            if d == self.root || !d.starts_with(&self.root) {
                break;
            }
            if fs::remove_dir(d).is_err() {
                break;
            }
            trace!(dir = %d.display(), "removed empty directory");
            current = d.parent();
        }
    }

    fn copy_tree(from: &Path, to: &Path) -> Result<()> {
        if from.is_dir() {
            mkdir_all(to)?;
            for entry in fs::read_dir(from).map_err(|e| io_err(from, e))? {
                let entry = entry.map_err(|e| io_err(from, e))?;
                Self::copy_tree(&entry.path(), &to.join(entry.file_name()))?;
            }
            return Ok(());
        }
        fs::copy(from, to).map_err(|e| io_err(to, e))?;
        #[cfg(unix)]
        chmod(to, FILE_MODE).map_err(|e| io_err(to, e))?;
        Ok(())
    }

    /// Whether a directory entry may be descended into while listing.
    fn visible(&self, path: &Path, is_dir: bool, prefix: &str) -> bool {
        if !is_dir {
            return true;
        }
        let hidden = path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with('.'))
            .unwrap_or(false);
        if !hidden {
            return true;
        }
        // a dot-directory is walked only when the prefix points into it
        match rel_string(&self.root, path) {
            Some(rel) => {
                let prefix = prefix.trim_end_matches('/');
                prefix == rel || prefix.starts_with(&format!("{rel}/"))
            }
            None => false,
        }
    }

    #[cfg(unix)]
    fn fsck_file(path: &Path, rel: &str, findings: &mut Vec<Finding>) -> Result<()> {
        let meta = fs::metadata(path).map_err(|e| io_err(path, e))?;
        let mode = mode_of(&meta);
        if mode & 0o177 != 0 {
            let fixed = mode & FILE_MODE;
            chmod(path, fixed).map_err(|e| io_err(path, e))?;
            findings.push(Finding::info(
                rel,
                format!("fixed file permissions from {mode:o} to {fixed:o}"),
            ));
        }
        Ok(())
    }

    #[cfg(unix)]
    fn fsck_dir(path: &Path, rel: &str, findings: &mut Vec<Finding>) -> Result<()> {
        let meta = fs::metadata(path).map_err(|e| io_err(path, e))?;
        let mode = mode_of(&meta);
        if mode & 0o077 != 0 {
            let fixed = mode & DIR_MODE;
            chmod(path, fixed).map_err(|e| io_err(path, e))?;
            findings.push(Finding::info(
                rel,
                format!("fixed directory permissions from {mode:o} to {fixed:o}"),
            ));
        }
        Ok(())
    }
}

impl Storage for Fs {
    fn name(&self) -> &'static str {
        if self.rcs.name() == "noop" {
            "fs"
        } else {
            "gitfs"
        }
    }

    fn path(&self) -> &Path {
        &self.root
    }

    fn get(&self, _opts: &Options, name: &str) -> Result<Vec<u8>> {
        let path = self.resolve(name)?;
        trace!(name, "reading entry");
        fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(name.to_string()).into(),
            _ => io_err(&path, e),
        })
    }

    fn set(&self, _opts: &Options, name: &str, value: &[u8]) -> Result<()> {
        let path = self.resolve(name)?;
        let target = self.write_target(&path, name)?;

        if let Ok(existing) = fs::read(&target) {
            if existing == value {
                return Err(StorageError::MeaninglessWrite(name.to_string()).into());
            }
        }

        let dir = target
            .parent()
            .ok_or_else(|| StorageError::Sneaky(name.to_string()))?;
        mkdir_all(dir)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".cairn-")
            .tempfile_in(dir)
            .map_err(|e| io_err(dir, e))?;
        tmp.write_all(value).map_err(|e| io_err(&target, e))?;
        tmp.as_file().sync_all().map_err(|e| io_err(&target, e))?;
        #[cfg(unix)]
        chmod(tmp.path(), FILE_MODE).map_err(|e| io_err(tmp.path(), e))?;
        tmp.persist(&target).map_err(|e| io_err(&target, e.error))?;

        debug!(name, bytes = value.len(), "wrote entry");
        Ok(())
    }

    fn delete(&self, _opts: &Options, name: &str) -> Result<()> {
        let path = self.resolve(name)?;
        if path == self.root {
            return Err(StorageError::Sneaky(name.to_string()).into());
        }
        fs::remove_file(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(name.to_string()).into(),
            _ => io_err(&path, e),
        })?;
        self.remove_empty_parents(path.parent());
        debug!(name, "deleted entry");
        Ok(())
    }

    fn exists(&self, _opts: &Options, name: &str) -> bool {
        self.resolve(name).map(|p| p.exists()).unwrap_or(false)
    }

    fn is_dir(&self, _opts: &Options, name: &str) -> bool {
        self.resolve(name).map(|p| p.is_dir()).unwrap_or(false)
    }

    fn list(&self, _opts: &Options, prefix: &str) -> Result<Vec<String>> {
        let prefix = validation::to_slash(prefix);
        let prefix = prefix.trim_start_matches('/');
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(true)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| self.visible(e.path(), e.file_type().is_dir(), prefix));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let at = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    if e.loop_ancestor().is_some() {
                        return Err(StorageError::SymlinkLoop(at).into());
                    }
                    match e.into_io_error() {
                        Some(io) if io.kind() == io::ErrorKind::NotFound => {
                            warn!(path = %at, "skipping dangling symlink");
                            continue;
                        }
                        Some(io) => return Err(io_err(Path::new(&at), io)),
                        None => continue,
                    }
                }
            };
            if entry.file_type().is_dir() {
                continue;
            }
            if let Some(rel) = rel_string(&self.root, entry.path()) {
                if rel.starts_with(prefix) {
                    out.push(rel);
                }
            }
        }

        out.sort();
        trace!(prefix, entries = out.len(), "listed entries");
        Ok(out)
    }

    fn prune(&self, _opts: &Options, prefix: &str) -> Result<()> {
        let path = self.resolve(prefix)?;
        if path == self.root {
            return Err(StoreError::InvalidName {
                name: prefix.to_string(),
                reason: "refusing to prune the store root".to_string(),
            }
            .into());
        }
        let meta = fs::symlink_metadata(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(prefix.to_string()).into(),
            _ => io_err(&path, e),
        })?;
        if meta.is_dir() {
            fs::remove_dir_all(&path).map_err(|e| io_err(&path, e))?;
        } else {
            fs::remove_file(&path).map_err(|e| io_err(&path, e))?;
        }
        self.remove_empty_parents(path.parent());
        debug!(prefix, "pruned subtree");
        Ok(())
    }

    fn move_entry(&self, _opts: &Options, from: &str, to: &str, delete_source: bool) -> Result<()> {
        let src = self.resolve(from)?;
        let dst = self.resolve(to)?;
        if !src.exists() {
            return Err(StorageError::NotFound(from.to_string()).into());
        }
        if let Some(dir) = dst.parent() {
            mkdir_all(dir)?;
        }

        if delete_source {
            if fs::rename(&src, &dst).is_err() {
                Self::copy_tree(&src, &dst)?;
                if src.is_dir() {
                    fs::remove_dir_all(&src).map_err(|e| io_err(&src, e))?;
                } else {
                    fs::remove_file(&src).map_err(|e| io_err(&src, e))?;
                }
            }
            self.remove_empty_parents(src.parent());
        } else {
            Self::copy_tree(&src, &dst)?;
        }
        debug!(from, to, delete_source, "moved entry");
        Ok(())
    }

    fn link(&self, _opts: &Options, from: &str, to: &str) -> Result<()> {
        let from_rel = validation::clean(from)?;
        let to_rel = validation::clean(to)?;
        let src = self.resolve(&from_rel)?;
        let dst = self.resolve(&to_rel)?;
        if !src.exists() {
            return Err(StorageError::NotFound(from.to_string()).into());
        }
        if let Some(dir) = dst.parent() {
            mkdir_all(dir)?;
        }

        let depth = validation::parent(&to_rel)
            .split('/')
            .filter(|s| !s.is_empty())
            .count();
        let target: PathBuf = std::iter::repeat("..")
            .take(depth)
            .chain(from_rel.split('/'))
            .collect();

        #[cfg(unix)]
        std::os::unix::fs::symlink(&target, &dst).map_err(|e| io_err(&dst, e))?;
        #[cfg(windows)]
        std::os::windows::fs::symlink_file(&target, &dst).map_err(|e| io_err(&dst, e))?;

        debug!(from, to, target = %target.display(), "linked entry");
        Ok(())
    }

    #[cfg(unix)]
    fn fsck(&self, opts: &Options) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();
        let mut dirs = std::collections::BTreeSet::new();

        for entry in self.list(opts, "")? {
            opts.progress();
            let path = self.root.join(&entry);
            Self::fsck_file(&path, &entry, &mut findings)?;
            if let Some(dir) = path.parent() {
                dirs.insert(dir.to_path_buf());
            }
        }
        for dir in &dirs {
            if dir.exists() {
                let rel = rel_string(&self.root, dir).unwrap_or_default();
                Self::fsck_dir(dir, &rel, &mut findings)?;
            }
        }

        // deepest first so nested empty directories collapse
        let mut candidates: Vec<PathBuf> = WalkDir::new(&self.root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| !e.file_name().to_string_lossy().starts_with('.'))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
            .map(|e| e.into_path())
            .collect();
        candidates.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
        for dir in candidates {
            let empty = fs::read_dir(&dir)
                .map(|mut it| it.next().is_none())
                .unwrap_or(false);
            if empty {
                fs::remove_dir(&dir).map_err(|e| io_err(&dir, e))?;
                let rel = rel_string(&self.root, &dir).unwrap_or_default();
                findings.push(Finding::info(rel, "removed empty directory"));
            }
        }

        Self::fsck_dir(&self.root, "", &mut findings)?;
        debug!(findings = findings.len(), "storage fsck complete");
        Ok(findings)
    }

    #[cfg(not(unix))]
    fn fsck(&self, _opts: &Options) -> Result<Vec<Finding>> {
        Ok(Vec::new())
    }

    fn rcs(&self) -> &dyn Rcs {
        self.rcs.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ErrorKind};
    use tempfile::TempDir;

    fn store() -> (TempDir, Fs, Options) {
        let dir = TempDir::new().unwrap();
        let fs = Fs::new(dir.path());
        (dir, fs, Options::default())
    }

    #[test]
    fn test_set_get() {
        let (_d, fs, opts) = store();
        fs.set(&opts, "a/b/c.gpg", b"data").unwrap();
        assert_eq!(fs.get(&opts, "a/b/c.gpg").unwrap(), b"data");
        assert!(fs.exists(&opts, "a/b/c.gpg"));
        assert!(fs.is_dir(&opts, "a/b"));
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let (_d, fs, opts) = store();
        assert!(fs.get(&opts, "nope").unwrap_err().is_not_found());
    }

    #[test]
    fn test_meaningless_write() {
        let (_d, fs, opts) = store();
        fs.set(&opts, "x", b"same").unwrap();
        let err = fs.set(&opts, "x", b"same").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MeaninglessWrite);
        fs.set(&opts, "x", b"other").unwrap();
    }

    #[test]
    fn test_sneaky_paths() {
        let (_d, fs, opts) = store();
        let err = fs.set(&opts, "../escape", b"x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Sneaky);
        assert!(fs.get(&opts, "a/../../x").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions() {
        let (d, fs, opts) = store();
        fs.set(&opts, "dir/file", b"x").unwrap();
        let file = fs::metadata(d.path().join("dir/file")).unwrap();
        let dir = fs::metadata(d.path().join("dir")).unwrap();
        assert_eq!(mode_of(&file), 0o600);
        assert_eq!(mode_of(&dir), 0o700);
    }

    #[test]
    fn test_delete_removes_empty_parents() {
        let (d, fs, opts) = store();
        fs.set(&opts, "a/b/c", b"x").unwrap();
        fs.set(&opts, "a/keep", b"y").unwrap();
        fs.delete(&opts, "a/b/c").unwrap();
        assert!(!d.path().join("a/b").exists());
        assert!(d.path().join("a").exists());
        assert!(d.path().exists());
        assert!(fs.delete(&opts, "a/b/c").unwrap_err().is_not_found());
    }

    #[test]
    fn test_list_sorted_and_skips_dot_dirs() {
        let (_d, fs, opts) = store();
        fs.set(&opts, "z.gpg", b"1").unwrap();
        fs.set(&opts, "a/b.gpg", b"2").unwrap();
        fs.set(&opts, ".gpg-id", b"3").unwrap();
        fs.set(&opts, ".git/config", b"4").unwrap();
        fs.set(&opts, ".public-keys/ABC", b"5").unwrap();
        assert_eq!(
            fs.list(&opts, "").unwrap(),
            vec![".gpg-id", "a/b.gpg", "z.gpg"]
        );
        assert_eq!(fs.list(&opts, "a/").unwrap(), vec!["a/b.gpg"]);
        assert_eq!(
            fs.list(&opts, ".public-keys/").unwrap(),
            vec![".public-keys/ABC"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_list_aborts_on_symlink_loop() {
        let (d, fs, opts) = store();
        fs.set(&opts, "a/file", b"x").unwrap();
        std::os::unix::fs::symlink("..", d.path().join("a/loop")).unwrap();
        let err = fs.list(&opts, "").unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::SymlinkLoop(_))));
    }

    #[test]
    fn test_prune() {
        let (d, fs, opts) = store();
        fs.set(&opts, "p/q/r", b"x").unwrap();
        fs.set(&opts, "p/q/s", b"y").unwrap();
        fs.prune(&opts, "p/q").unwrap();
        assert!(!d.path().join("p").exists());
        assert!(fs.prune(&opts, "p").unwrap_err().is_not_found());
        assert!(fs.prune(&opts, "").is_err());
    }

    #[test]
    fn test_move_and_copy() {
        let (_d, fs, opts) = store();
        fs.set(&opts, "a/x", b"1").unwrap();
        fs.move_entry(&opts, "a/x", "b/c/x", false).unwrap();
        assert!(fs.exists(&opts, "a/x"));
        fs.move_entry(&opts, "a/x", "d/x", true).unwrap();
        assert!(!fs.exists(&opts, "a/x"));
        assert!(!fs.is_dir(&opts, "a"));
        assert_eq!(fs.get(&opts, "d/x").unwrap(), b"1");
    }

    #[cfg(unix)]
    #[test]
    fn test_link_is_relative() {
        let (d, fs, opts) = store();
        fs.set(&opts, "a/b.gpg", b"secret").unwrap();
        fs.link(&opts, "a/b.gpg", "c/d/e.gpg").unwrap();
        let target = fs::read_link(d.path().join("c/d/e.gpg")).unwrap();
        assert_eq!(target, PathBuf::from("../../a/b.gpg"));
        assert_eq!(fs.get(&opts, "c/d/e.gpg").unwrap(), b"secret");
        assert!(fs.link(&opts, "missing", "x").unwrap_err().is_not_found());
    }

    #[cfg(unix)]
    #[test]
    fn test_set_through_link_writes_target() {
        let (_d, fs, opts) = store();
        fs.set(&opts, "real", b"v1").unwrap();
        fs.link(&opts, "real", "alias").unwrap();
        fs.set(&opts, "alias", b"v2").unwrap();
        assert_eq!(fs.get(&opts, "real").unwrap(), b"v2");
    }

    #[cfg(unix)]
    #[test]
    fn test_fsck_fixes_permissions_and_empty_dirs() {
        let (d, fs, opts) = store();
        fs.set(&opts, "a/file", b"x").unwrap();
        chmod(&d.path().join("a/file"), 0o644).unwrap();
        chmod(&d.path().join("a"), 0o755).unwrap();
        fs::create_dir_all(d.path().join("empty/nested")).unwrap();

        let findings = fs.fsck(&opts).unwrap();
        assert!(!findings.is_empty());
        assert_eq!(mode_of(&fs::metadata(d.path().join("a/file")).unwrap()), 0o600);
        assert_eq!(mode_of(&fs::metadata(d.path().join("a")).unwrap()), 0o700);
        assert!(!d.path().join("empty").exists());

        fs.fsck(&opts).unwrap();
        assert!(fs
            .fsck(&opts)
            .unwrap()
            .iter()
            .all(|f| !f.message.contains("permissions")));
    }
}
