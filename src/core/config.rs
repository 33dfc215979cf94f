//! Configuration file management.
//!
//! Handles reading, writing, and validating the TOML configuration file
//! (`<config dir>/cairn/config.toml` by default). Every key is optional;
//! missing keys take their documented default.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::core::cipher::CryptoBackend;
use crate::core::constants;
use crate::core::context::Options;
use crate::core::validation;
use crate::error::{ConfigError, Result, StorageError};

/// Configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Copy passwords to the clipboard when shown.
    pub autoclip: bool,
    /// Import missing recipient keys from `.public-keys/` without asking.
    pub autoimport: bool,
    /// Seconds before the clipboard is cleared.
    pub cliptimeout: u64,
    /// Export recipient public keys into the store.
    pub exportkeys: bool,
    pub nopager: bool,
    pub notifications: bool,
    /// Root store location.
    pub path: PathBuf,
    /// Never print the password line unless asked.
    pub safecontent: bool,
    /// Worker count for bulk re-encryption.
    pub concurrency: usize,
    /// Verify recipient list hashes on read.
    pub check_recipients: bool,
    pub usesymbols: bool,
    /// Backend used when a store has no recipient list yet.
    pub crypto: CryptoBackend,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xc_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpg_home: Option<PathBuf>,
    /// Mount alias to leaf store root.
    pub mounts: BTreeMap<String, PathBuf>,
    /// Store alias (empty for the root) to recipient list hash.
    pub recipient_hashes: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            autoclip: false,
            autoimport: true,
            cliptimeout: constants::DEFAULT_CLIP_TIMEOUT,
            exportkeys: true,
            nopager: false,
            notifications: true,
            path: default_store_dir(),
            safecontent: false,
            concurrency: 1,
            check_recipients: false,
            usesymbols: false,
            crypto: CryptoBackend::Gpg,
            xc_dir: None,
            age_dir: None,
            gpg_home: None,
            mounts: BTreeMap::new(),
            recipient_hashes: BTreeMap::new(),
        }
    }
}

/// `$PASSWORD_STORE_DIR`, else `~/.password-store`.
pub fn default_store_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(constants::STORE_DIR_ENV).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(constants::DEFAULT_STORE_DIR)
}

/// Per-user application directory, `<config dir>/cairn`.
pub fn app_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(constants::APP_DIR)
}

impl Config {
    /// Default config file location.
    pub fn default_path() -> PathBuf {
        app_dir().join(constants::CONFIG_FILE)
    }

    /// Load configuration from `path`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Read` if the file can not be read,
    /// `ConfigError::Parse` if the TOML is malformed, or
    /// `ConfigError::Invalid` if validation fails.
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading config");
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
        let config: Self = toml::from_str(&contents).map_err(ConfigError::Parse)?;
        debug!(
            mounts = config.mounts.len(),
            crypto = config.crypto.name(),
            "config loaded"
        );
        config.validate()?;
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Save configuration to `path` with mode 0600.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        debug!(path = %path.display(), "saving config");
        self.validate()?;
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        let io_err = |source| StorageError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(io_err)?;
        }
        std::fs::write(path, contents).map_err(io_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(
                path,
                std::fs::Permissions::from_mode(constants::FILE_MODE),
            )
            .map_err(io_err)?;
        }
        Ok(())
    }

    /// Validate the configuration.
    ///
    /// Checks:
    /// - `concurrency` is at least 1
    /// - mount aliases are non-empty, clean names
    /// - no two mounts share a filesystem path, and none reuses `path`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()).into());
        }
        let mut seen: BTreeMap<&Path, &str> = BTreeMap::new();
        seen.insert(self.path.as_path(), "");
        for (alias, path) in &self.mounts {
            let clean = validation::clean(alias)
                .map_err(|_| ConfigError::Invalid(format!("invalid mount alias {alias:?}")))?;
            if clean.is_empty() {
                return Err(ConfigError::Invalid("mount alias must not be empty".into()).into());
            }
            if let Some(other) = seen.insert(path.as_path(), alias) {
                return Err(ConfigError::Invalid(format!(
                    "mount {alias} uses the same path as {}",
                    if other.is_empty() { "the root store" } else { other }
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Options carrier reflecting this configuration.
    pub fn options(&self) -> Options {
        let mut opts = Options::default();
        opts.auto_import = self.autoimport;
        opts.export_keys = self.exportkeys;
        opts.no_pager = self.nopager;
        opts.check_recipients = self.check_recipients;
        opts.concurrency = self.concurrency.max(1);
        opts.clip_timeout = Duration::from_secs(self.cliptimeout);
        opts
    }

    /// XC keyring directory.
    pub fn xc_dir(&self) -> PathBuf {
        self.xc_dir.clone().unwrap_or_else(|| app_dir().join("xc"))
    }

    /// Age identity directory.
    pub fn age_dir(&self) -> PathBuf {
        self.age_dir.clone().unwrap_or_else(|| app_dir().join("age"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.autoimport);
        assert!(config.exportkeys);
        assert!(config.notifications);
        assert!(!config.autoclip);
        assert_eq!(config.cliptimeout, 45);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.crypto, CryptoBackend::Gpg);
        assert!(config.mounts.is_empty());
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            path = "/tmp/store"
            concurrency = 4
            crypto = "xc"

            [mounts]
            work = "/tmp/work"
            "#,
        )
        .unwrap();
        assert_eq!(config.path, PathBuf::from("/tmp/store"));
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.crypto, CryptoBackend::Xc);
        assert_eq!(config.mounts["work"], PathBuf::from("/tmp/work"));
        assert!(config.autoimport);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.path = tmp.path().join("store");
        config.mounts.insert("team".into(), tmp.path().join("team"));
        config
            .recipient_hashes
            .insert(String::new(), "abc".into());
        config.xc_dir = Some(tmp.path().join("xc"));
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let tmp = TempDir::new().unwrap();
        let config = Config::load_or_default(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.concurrency, 1);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = Config {
            concurrency: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_shared_mount_path() {
        let mut config = Config::default();
        config.path = PathBuf::from("/tmp/root");
        config.mounts.insert("a".into(), PathBuf::from("/tmp/x"));
        config.mounts.insert("b".into(), PathBuf::from("/tmp/x"));
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.path = PathBuf::from("/tmp/root");
        config.mounts.insert("a".into(), PathBuf::from("/tmp/root"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_alias() {
        let mut config = Config::default();
        config.mounts.insert("../up".into(), PathBuf::from("/tmp/up"));
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.mounts.insert("/".into(), PathBuf::from("/tmp/slash"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "concurrency = [").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Config(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_options_follow_config() {
        let config = Config {
            autoimport: false,
            concurrency: 8,
            cliptimeout: 10,
            ..Config::default()
        };
        let opts = config.options();
        assert!(!opts.auto_import);
        assert_eq!(opts.concurrency, 8);
        assert_eq!(opts.clip_timeout, Duration::from_secs(10));
    }
}
