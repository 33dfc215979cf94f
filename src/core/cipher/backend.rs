//! Crypto backend selection and dispatch.
//!
//! `CryptoBackend` names every supported backend; `Registry` instantiates
//! them lazily and hands out shared handles, so every leaf using the same
//! backend shares one keyring.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::xc::KdfParams;
use super::{Age, Crypto, Gpg, Plain, Xc};
use crate::core::agent::{Agent, CachingAgent};
use crate::core::config::Config;
use crate::core::context::Options;
use crate::core::storage::Storage;
use crate::error::{CryptoError, Result};

/// Crypto backend identifier.
///
/// - `Gpg`: GnuPG CLI (default)
/// - `Age`: x25519 age recipients
/// - `Xc`: in-tree hybrid scheme
/// - `Plain`: identity transform, tests only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CryptoBackend {
    Gpg,
    Age,
    Xc,
    Plain,
}

impl CryptoBackend {
    /// Detection order.
    pub const PRIORITY: [CryptoBackend; 4] = [Self::Gpg, Self::Age, Self::Xc, Self::Plain];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Gpg => "gpg",
            Self::Age => "age",
            Self::Xc => "xc",
            Self::Plain => "plain",
        }
    }

    /// Recipient list filename this backend owns.
    pub fn id_file(&self) -> &'static str {
        match self {
            Self::Gpg => ".gpg-id",
            Self::Age => ".age-recipients",
            Self::Xc => ".xc-ids",
            Self::Plain => ".plain-id",
        }
    }

    /// Ciphertext extension.
    pub fn ext(&self) -> &'static str {
        match self {
            Self::Gpg => "gpg",
            Self::Age => "age",
            Self::Xc => "xc",
            Self::Plain => "txt",
        }
    }

    /// Whether a store is managed by this backend.
    pub fn handles(&self, opts: &Options, storage: &dyn Storage) -> bool {
        storage.exists(opts, self.id_file())
    }
}

impl fmt::Display for CryptoBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CryptoBackend {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gpg" | "gpgcli" => Ok(Self::Gpg),
            "age" => Ok(Self::Age),
            "xc" => Ok(Self::Xc),
            "plain" => Ok(Self::Plain),
            other => Err(CryptoError::UnknownBackend(other.to_string()).into()),
        }
    }
}

/// Everything needed to construct a backend.
#[derive(Clone)]
pub struct CryptoSettings {
    pub default: CryptoBackend,
    pub xc_dir: Option<PathBuf>,
    pub age_dir: Option<PathBuf>,
    pub gpg_home: Option<PathBuf>,
    pub agent: Arc<dyn Agent>,
    pub kdf: KdfParams,
}

impl fmt::Debug for CryptoSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoSettings")
            .field("default", &self.default)
            .field("xc_dir", &self.xc_dir)
            .field("age_dir", &self.age_dir)
            .field("gpg_home", &self.gpg_home)
            .field("kdf", &self.kdf)
            .finish_non_exhaustive()
    }
}

impl CryptoSettings {
    /// Settings with in-memory keyrings and a non-interactive agent.
    pub fn new(default: CryptoBackend) -> Self {
        Self {
            default,
            xc_dir: None,
            age_dir: None,
            gpg_home: None,
            agent: Arc::new(CachingAgent::non_interactive()),
            kdf: KdfParams::default(),
        }
    }

    pub fn from_config(config: &Config, agent: Arc<dyn Agent>) -> Self {
        Self {
            default: config.crypto,
            xc_dir: Some(config.xc_dir()),
            age_dir: Some(config.age_dir()),
            gpg_home: config.gpg_home.clone(),
            agent,
            kdf: KdfParams::default(),
        }
    }

    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agent = agent;
        self
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn with_xc_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.xc_dir = Some(dir.into());
        self
    }

    pub fn with_age_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.age_dir = Some(dir.into());
        self
    }
}

/// Lazily constructed, shared backend instances.
pub struct Registry {
    settings: CryptoSettings,
    loaded: Mutex<HashMap<CryptoBackend, Arc<dyn Crypto>>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let loaded: Vec<CryptoBackend> = self
            .loaded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        f.debug_struct("Registry")
            .field("settings", &self.settings)
            .field("loaded", &loaded)
            .finish()
    }
}

impl Registry {
    pub fn new(settings: CryptoSettings) -> Self {
        Self {
            settings,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &CryptoSettings {
        &self.settings
    }

    pub fn agent(&self) -> Arc<dyn Agent> {
        Arc::clone(&self.settings.agent)
    }

    fn load(&self, backend: CryptoBackend) -> Result<Arc<dyn Crypto>> {
        let s = &self.settings;
        let crypto: Arc<dyn Crypto> = match backend {
            CryptoBackend::Gpg => Arc::new(Gpg::new(s.gpg_home.as_deref())),
            CryptoBackend::Age => match &s.age_dir {
                Some(dir) => Arc::new(Age::open(dir)),
                None => Arc::new(Age::in_memory()),
            },
            CryptoBackend::Xc => match &s.xc_dir {
                Some(dir) => Arc::new(Xc::open(dir, Arc::clone(&s.agent), s.kdf)?),
                None => Arc::new(Xc::in_memory(Arc::clone(&s.agent), s.kdf)),
            },
            CryptoBackend::Plain => Arc::new(Plain),
        };
        debug!(backend = backend.name(), "loaded crypto backend");
        Ok(crypto)
    }

    /// Shared instance of `backend`, constructing it on first use.
    pub fn get(&self, backend: CryptoBackend) -> Result<Arc<dyn Crypto>> {
        let mut loaded = self.loaded.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(crypto) = loaded.get(&backend) {
            return Ok(Arc::clone(crypto));
        }
        let crypto = self.load(backend)?;
        loaded.insert(backend, Arc::clone(&crypto));
        Ok(crypto)
    }

    /// Install a pre-built instance, replacing any loaded one.
    pub fn register(&self, backend: CryptoBackend, crypto: Arc<dyn Crypto>) {
        self.loaded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(backend, crypto);
    }

    /// First backend (in priority order) whose recipient list exists in
    /// `storage`, else the configured default.
    pub fn detect(&self, opts: &Options, storage: &dyn Storage) -> CryptoBackend {
        let backend = CryptoBackend::PRIORITY
            .into_iter()
            .find(|b| b.handles(opts, storage))
            .unwrap_or(self.settings.default);
        debug!(backend = backend.name(), path = %storage.path().display(), "detected crypto");
        backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::Fs;
    use tempfile::TempDir;

    #[test]
    fn test_from_str() {
        assert_eq!("gpg".parse::<CryptoBackend>().unwrap(), CryptoBackend::Gpg);
        assert_eq!("gpgcli".parse::<CryptoBackend>().unwrap(), CryptoBackend::Gpg);
        assert_eq!(" XC ".parse::<CryptoBackend>().unwrap(), CryptoBackend::Xc);
        assert!("rot13".parse::<CryptoBackend>().is_err());
    }

    #[test]
    fn test_names_match_instances() {
        let registry = Registry::new(CryptoSettings::new(CryptoBackend::Plain));
        for backend in CryptoBackend::PRIORITY {
            let crypto = registry.get(backend).unwrap();
            assert_eq!(crypto.name(), backend.name());
            assert_eq!(crypto.ext(), backend.ext());
            assert_eq!(crypto.id_file(), backend.id_file());
        }
    }

    #[test]
    fn test_get_shares_instance() {
        let registry = Registry::new(CryptoSettings::new(CryptoBackend::Xc));
        let a = registry.get(CryptoBackend::Xc).unwrap();
        let b = registry.get(CryptoBackend::Xc).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_detect() {
        let dir = TempDir::new().unwrap();
        let fs = Fs::new(dir.path());
        let opts = Options::default();
        let registry = Registry::new(CryptoSettings::new(CryptoBackend::Xc));
        assert_eq!(registry.detect(&opts, &fs), CryptoBackend::Xc);

        std::fs::write(dir.path().join(".age-recipients"), "age1x\n").unwrap();
        assert_eq!(registry.detect(&opts, &fs), CryptoBackend::Age);

        std::fs::write(dir.path().join(".gpg-id"), "ABCD\n").unwrap();
        assert_eq!(registry.detect(&opts, &fs), CryptoBackend::Gpg);
    }

    #[test]
    fn test_serde_lowercase() {
        #[derive(Serialize, Deserialize)]
        struct Doc {
            crypto: CryptoBackend,
        }
        let doc: Doc = toml::from_str("crypto = \"age\"").unwrap();
        assert_eq!(doc.crypto, CryptoBackend::Age);
        assert_eq!(
            toml::to_string(&Doc {
                crypto: CryptoBackend::Plain
            })
            .unwrap()
            .trim(),
            "crypto = \"plain\""
        );
    }
}
