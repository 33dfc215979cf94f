//! Test support utilities for cairn integration tests.
//!
//! Every test gets its own temporary directory and an in-memory XC
//! keyring, so tests can run in parallel without touching the user's
//! home directory.

#![allow(dead_code)]

pub mod skip;

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use cairn::core::agent::CachingAgent;
use cairn::core::cipher::xc::KdfParams;
use cairn::core::cipher::{Crypto, CryptoBackend, CryptoSettings, Keyring, Registry, Xc};
use cairn::core::storage::StorageBackend;
use cairn::{Leaf, Options, Root};
use secrecy::SecretString;
use tempfile::TempDir;

pub const PASSPHRASE: &str = "correct horse battery staple";

/// Isolated test environment.
pub struct Test {
    /// Parent of every store created by this test
    pub dir: TempDir,
    /// Keyring shared by every store of this test
    pub xc: Arc<Xc>,
    pub registry: Arc<Registry>,
}

impl Test {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let xc = Arc::new(Xc::in_memory(
            Arc::new(CachingAgent::fixed(PASSPHRASE)),
            KdfParams::insecure_fast(),
        ));
        let registry = Arc::new(Registry::new(CryptoSettings::new(CryptoBackend::Xc)));
        let crypto: Arc<dyn Crypto> = xc.clone();
        registry.register(CryptoBackend::Xc, crypto);
        Self { dir, xc, registry }
    }

    /// Options with a fixed author and no network access.
    pub fn opts(&self) -> Options {
        Options::default()
            .with_author("Test User", "test@example.com")
            .with_no_network(true)
    }

    /// Generate a key pair and return its fingerprint.
    pub fn key(&self, name: &str) -> String {
        self.xc
            .create_private_key(
                &self.opts(),
                name,
                &format!("{name}@example.com"),
                &SecretString::from(PASSPHRASE.to_string()),
            )
            .expect("failed to create key")
    }

    pub fn path(&self, sub: &str) -> PathBuf {
        self.dir.path().join(sub)
    }

    /// Create and initialize an XC store in `sub`.
    pub fn leaf(&self, alias: &str, sub: &str, storage: StorageBackend, ids: &[String]) -> Leaf {
        Leaf::create(
            &self.opts(),
            alias,
            &self.path(sub),
            storage,
            CryptoBackend::Xc,
            &self.registry,
            ids,
        )
        .expect("failed to create store")
    }

    pub fn root(&self, leaf: Leaf) -> Root {
        Root::new(leaf, Arc::clone(&self.registry))
    }

    /// Number of commits in the repository at `sub`.
    pub fn commit_count(&self, sub: &str) -> usize {
        let out = Command::new("git")
            .arg("-C")
            .arg(self.path(sub))
            .args(["rev-list", "--count", "HEAD"])
            .output()
            .expect("failed to run git");
        String::from_utf8_lossy(&out.stdout)
            .trim()
            .parse()
            .unwrap_or(0)
    }

    /// Subject of the newest commit in the repository at `sub`.
    pub fn last_commit(&self, sub: &str) -> String {
        let out = Command::new("git")
            .arg("-C")
            .arg(self.path(sub))
            .args(["log", "-1", "--format=%s"])
            .output()
            .expect("failed to run git");
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }
}
