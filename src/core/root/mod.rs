//! Root store: routes names to leaf stores through the mount table.
//!
//! The root owns one leaf for the store at the configured path plus one
//! leaf per mount. A name belongs to the mount whose alias is its longest
//! segment-aligned prefix; everything else belongs to the root leaf. All
//! leaves share the crypto backends of one [`Registry`].

mod mount;
mod moves;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::cipher::Registry;
use crate::core::config::Config;
use crate::core::context::Options;
use crate::core::domain::{FsckReport, Recipients, Revision, Secret};
use crate::core::leaf::Leaf;
use crate::core::tree::Tree;
use crate::core::types::{Alias, Fingerprint, SecretName};
use crate::core::validation;
use crate::error::{Result, StoreError};

/// Label of the tree's root node.
const TREE_NAME: &str = "cairn";

/// The mount-aware store facade.
pub struct Root {
    store: Arc<Leaf>,
    mounts: BTreeMap<String, Arc<Leaf>>,
    registry: Arc<Registry>,
}

impl fmt::Debug for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Root")
            .field("store", &self.store)
            .field("mounts", &self.mounts.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Root {
    /// Root over an already opened leaf, without mounts.
    pub fn new(store: Leaf, registry: Arc<Registry>) -> Self {
        Self {
            store: Arc::new(store),
            mounts: BTreeMap::new(),
            registry,
        }
    }

    /// Open the root store and every configured mount.
    ///
    /// Mounts that fail to open are logged and skipped; uninitialized
    /// mounts are kept so they can be initialized later.
    pub fn open(opts: &Options, config: &Config, registry: Arc<Registry>) -> Result<Self> {
        let store = Leaf::open(opts, "", &config.path, &registry)?;
        store.set_recipients_hash(config.recipient_hashes.get("").cloned());

        let mut root = Self::new(store, registry);
        for (alias, path) in &config.mounts {
            let leaf = match Leaf::open(opts, alias, path, &root.registry) {
                Ok(leaf) => leaf,
                Err(e) => {
                    warn!(alias = %alias, path = %path.display(), error = %e, "failed to open mount");
                    continue;
                }
            };
            if !leaf.is_initialized(opts) {
                warn!(alias = %alias, path = %path.display(), "mount is not initialized");
            }
            leaf.set_recipients_hash(config.recipient_hashes.get(alias).cloned());
            root.mounts.insert(alias.clone(), Arc::new(leaf));
        }
        debug!(mounts = root.mounts.len(), "opened root store");
        Ok(root)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The leaf at the configured root path.
    pub fn store(&self) -> &Arc<Leaf> {
        &self.store
    }

    /// Mount aliases and the paths they point at.
    pub fn mounts(&self) -> BTreeMap<Alias, PathBuf> {
        self.mounts
            .iter()
            .map(|(alias, leaf)| (alias.clone(), leaf.path().to_path_buf()))
            .collect()
    }

    /// Recorded recipient list hash of every leaf, keyed by alias.
    pub fn recipient_hashes(&self) -> BTreeMap<Alias, String> {
        self.leaves()
            .filter_map(|leaf| leaf.recipients_hash().map(|h| (leaf.alias().to_string(), h)))
            .collect()
    }

    /// Write the mount table and recipient hashes back into `config`.
    pub fn update_config(&self, config: &mut Config) {
        config.mounts = self.mounts();
        config.recipient_hashes = self.recipient_hashes();
    }

    fn leaves(&self) -> impl Iterator<Item = &Arc<Leaf>> {
        std::iter::once(&self.store).chain(self.mounts.values())
    }

    /// Mount aliases, longest first.
    pub fn mount_points(&self) -> Vec<Alias> {
        let mut aliases: Vec<String> = self.mounts.keys().cloned().collect();
        aliases.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        aliases
    }

    /// Longest alias that equals `name` or is a directory prefix of it.
    pub fn mount_point(&self, name: &str) -> Option<Alias> {
        let name = name.trim_matches('/');
        self.mount_points().into_iter().find(|alias| {
            name == alias
                || name
                    .strip_prefix(alias.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    /// Leaf owning `name` and the name relative to that leaf.
    pub fn get_store(&self, name: &str) -> (&Arc<Leaf>, String) {
        let name = name.trim_matches('/');
        match self.mount_point(name) {
            Some(alias) => match self.mounts.get(&alias) {
                Some(leaf) => {
                    let rel = name[alias.len()..].trim_start_matches('/');
                    (leaf, rel.to_string())
                }
                None => (&self.store, name.to_string()),
            },
            None => (&self.store, name.to_string()),
        }
    }

    /// Leaf mounted at `alias`; `""` is the root store.
    pub fn get_sub_store(&self, alias: &str) -> Result<&Arc<Leaf>> {
        if alias.is_empty() {
            return Ok(&self.store);
        }
        self.mounts
            .get(alias)
            .ok_or_else(|| StoreError::NotMounted(alias.to_string()).into())
    }

    pub fn is_initialized(&self, opts: &Options) -> bool {
        self.store.is_initialized(opts)
    }

    /// Initialize the leaf at `alias` for `ids`.
    pub fn init(&self, opts: &Options, alias: &str, ids: &[String]) -> Result<()> {
        self.get_sub_store(alias)?.init(opts, ids)
    }

    pub fn get(&self, opts: &Options, name: &str) -> Result<Secret> {
        let (leaf, rel) = self.get_store(name);
        leaf.get(opts, &rel)
    }

    pub fn set(&self, opts: &Options, name: &str, secret: &Secret) -> Result<()> {
        let (leaf, rel) = self.get_store(name);
        leaf.set(opts, &rel, secret)
    }

    pub fn exists(&self, opts: &Options, name: &str) -> bool {
        let (leaf, rel) = self.get_store(name);
        !rel.is_empty() && leaf.exists(opts, &rel)
    }

    /// Whether `name` is a folder; mount points always are.
    pub fn is_dir(&self, opts: &Options, name: &str) -> bool {
        let (leaf, rel) = self.get_store(name);
        rel.is_empty() || leaf.is_dir(opts, &rel)
    }

    /// Link two secrets of the same leaf.
    pub fn link(&self, opts: &Options, from: &str, to: &str) -> Result<()> {
        let (from_leaf, from_rel) = self.get_store(from);
        let (to_leaf, to_rel) = self.get_store(to);
        if !Arc::ptr_eq(from_leaf, to_leaf) {
            return Err(StoreError::InvalidName {
                name: to.to_string(),
                reason: "links can not cross mounts".to_string(),
            }
            .into());
        }
        from_leaf.link(opts, &from_rel, &to_rel)
    }

    pub fn revisions(&self, opts: &Options, name: &str) -> Result<Vec<Revision>> {
        let (leaf, rel) = self.get_store(name);
        leaf.revisions(opts, &rel)
    }

    pub fn get_revision(&self, opts: &Options, name: &str, revision: &str) -> Result<Secret> {
        let (leaf, rel) = self.get_store(name);
        leaf.get_revision(opts, &rel, revision)
    }

    /// Recipients governing `name`.
    pub fn get_recipients(&self, opts: &Options, name: &str) -> Result<Recipients> {
        let (leaf, rel) = self.get_store(name);
        leaf.get_recipients(opts, &rel)
    }

    /// Root recipients of the leaf at `alias`.
    pub fn recipients(&self, opts: &Options, alias: &str) -> Result<Vec<Fingerprint>> {
        Ok(self.get_sub_store(alias)?.get_recipients(opts, "")?.ids())
    }

    pub fn add_recipient(&self, opts: &Options, alias: &str, id: &str) -> Result<()> {
        self.get_sub_store(alias)?.add_recipient(opts, id)
    }

    pub fn remove_recipient(&self, opts: &Options, alias: &str, id: &str) -> Result<()> {
        self.get_sub_store(alias)?.remove_recipient(opts, id)
    }

    /// Template governing the secret `name`.
    pub fn lookup_template(&self, opts: &Options, name: &str) -> Option<Vec<u8>> {
        let (leaf, rel) = self.get_store(name);
        leaf.lookup_template(opts, &rel).map(|(_, content)| content)
    }

    pub fn set_template(&self, opts: &Options, name: &str, content: &[u8]) -> Result<()> {
        let (leaf, rel) = self.get_store(name);
        leaf.set_template(opts, &rel, content)
    }

    /// Tree of every secret across all leaves.
    ///
    /// Mounts are added in ascending alias length so deeper mounts shadow
    /// what a shallower store holds at the same path.
    pub fn tree(&self, opts: &Options) -> Result<Tree> {
        let mut tree = Tree::new(TREE_NAME);
        add_leaf(opts, &mut tree, &self.store, "")?;

        let mut aliases = self.mount_points();
        aliases.reverse();
        for alias in aliases {
            if let Some(leaf) = self.mounts.get(&alias) {
                tree.add_mount(&alias, &leaf.path().display().to_string());
                add_leaf(opts, &mut tree, leaf, &alias)?;
            }
        }
        Ok(tree)
    }

    /// Every secret name across all leaves, sorted.
    pub fn list(&self, opts: &Options) -> Result<Vec<SecretName>> {
        Ok(self.tree(opts)?.list(None))
    }

    /// Check every leaf, or only the one owning `prefix`.
    pub fn fsck(&self, opts: &Options, prefix: &str) -> Result<FsckReport> {
        let mut report = FsckReport::default();
        let targets: Vec<(&Arc<Leaf>, String)> = if prefix.trim_matches('/').is_empty() {
            self.leaves().map(|leaf| (leaf, String::new())).collect()
        } else {
            vec![self.get_store(prefix)]
        };

        for (leaf, rel) in targets {
            opts.check_cancelled()?;
            debug!(alias = %leaf.alias(), prefix = %rel, "checking leaf");
            let mut sub = leaf.fsck(opts, &rel)?;
            if !leaf.alias().is_empty() {
                for finding in &mut sub.findings {
                    finding.path = validation::join(leaf.alias(), &finding.path);
                }
                for name in &mut sub.fixed {
                    *name = validation::join(leaf.alias(), name);
                }
            }
            report.merge(sub);
        }
        if report.has_errors() {
            warn!(findings = report.findings.len(), "fsck found errors");
        }
        Ok(report)
    }
}

fn add_leaf(opts: &Options, tree: &mut Tree, leaf: &Leaf, alias: &str) -> Result<()> {
    for name in leaf.list(opts, "")? {
        tree.add_file(&validation::join(alias, &name));
    }
    match leaf.list_templates(opts) {
        Ok(dirs) => {
            for dir in dirs {
                tree.add_template(&validation::join(alias, &dir));
            }
        }
        Err(e) => warn!(alias, error = %e, "failed to list templates"),
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::core::cipher::{CryptoBackend, CryptoSettings, Plain};
    use crate::core::storage::Fs;
    use tempfile::TempDir;

    pub const PLAIN_ID: &str = "0xDEADBEEF";

    pub fn registry() -> Arc<Registry> {
        Arc::new(Registry::new(CryptoSettings::new(CryptoBackend::Plain)))
    }

    pub fn plain_leaf(alias: &str, dir: &TempDir) -> Leaf {
        let leaf = Leaf::new(alias, Arc::new(Fs::new(dir.path())), Arc::new(Plain));
        leaf.init(&Options::default(), &[PLAIN_ID.to_string()])
            .unwrap();
        leaf
    }

    /// Root with entries `foo/bar`, `foo/baz` and `misc/zab`.
    pub fn populated() -> (TempDir, Root) {
        let dir = TempDir::new().unwrap();
        let root = Root::new(plain_leaf("", &dir), registry());
        let opts = Options::default();
        for name in ["foo/bar", "foo/baz", "misc/zab"] {
            root.set(&opts, name, &Secret::from(name)).unwrap();
        }
        (dir, root)
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_mount_routing() {
        let (_dir, mut root) = populated();
        let opts = Options::default();
        let sub2 = TempDir::new().unwrap();
        let sub3 = TempDir::new().unwrap();
        root.add_mount(&opts, "sub2", sub2.path(), &[PLAIN_ID.to_string()])
            .unwrap();
        root.add_mount(&opts, "sub2/sub3", sub3.path(), &[PLAIN_ID.to_string()])
            .unwrap();

        assert_eq!(root.mount_points(), vec!["sub2/sub3", "sub2"]);
        assert_eq!(root.mount_point("sub2/sub3/x").as_deref(), Some("sub2/sub3"));
        assert_eq!(root.mount_point("sub2/sub3").as_deref(), Some("sub2/sub3"));
        assert_eq!(root.mount_point("sub2/sub33").as_deref(), Some("sub2"));
        assert_eq!(root.mount_point("sub22/x"), None);

        let (leaf, rel) = root.get_store("sub2/sub3/deep/name");
        assert_eq!(leaf.alias(), "sub2/sub3");
        assert_eq!(rel, "deep/name");
        let (leaf, rel) = root.get_store("foo/bar");
        assert_eq!(leaf.alias(), "");
        assert_eq!(rel, "foo/bar");
    }

    #[test]
    fn test_tree_across_mounts() {
        let (_dir, mut root) = populated();
        let opts = Options::default();
        let work = TempDir::new().unwrap();
        root.add_mount(&opts, "work", work.path(), &[PLAIN_ID.to_string()])
            .unwrap();
        root.set(&opts, "work/secret", &Secret::from("pw")).unwrap();

        assert_eq!(
            root.list(&opts).unwrap(),
            vec!["foo/bar", "foo/baz", "misc/zab", "work/secret"]
        );
        assert_eq!(
            root.store().list(&opts, "").unwrap(),
            vec!["foo/bar", "foo/baz", "misc/zab"]
        );
        let tree = root.tree(&opts).unwrap();
        let work_node = tree.find_folder("work").unwrap();
        assert!(work_node.root().mount().is_some());
    }

    #[test]
    fn test_fsck_prefixes_mount_paths() {
        let (_dir, mut root) = populated();
        let opts = Options::default();
        let work = TempDir::new().unwrap();
        root.add_mount(&opts, "work", work.path(), &[PLAIN_ID.to_string()])
            .unwrap();
        root.set(&opts, "work/secret", &Secret::from("pw")).unwrap();
        std::fs::write(work.path().join("broken.txt"), b"").unwrap();

        let report = root.fsck(&opts.with_fsck(false, false, true), "").unwrap();
        assert!(report
            .findings
            .iter()
            .any(|f| f.path == "work/broken"));
    }

    #[test]
    fn test_update_config() {
        let (_dir, mut root) = populated();
        let opts = Options::default();
        let work = TempDir::new().unwrap();
        root.add_mount(&opts, "work", work.path(), &[PLAIN_ID.to_string()])
            .unwrap();

        let mut config = Config::default();
        root.update_config(&mut config);
        assert_eq!(config.mounts["work"], work.path().to_path_buf());
        assert!(config.recipient_hashes.contains_key(""));
        assert!(config.recipient_hashes.contains_key("work"));
    }
}
