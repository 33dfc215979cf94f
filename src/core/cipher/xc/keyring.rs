//! XC public and private key rings.
//!
//! Each ring is a bincode catalog of records persisted atomically. Records
//! are keyed by fingerprint; inserting an existing fingerprint replaces it.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace};

use super::key::{PrivateKey, PublicKey};
use crate::core::constants::FILE_MODE;
use crate::error::{CryptoError, Result, StorageError};

pub const PUBRING_FILE: &str = "pubring.xc";
pub const SECRING_FILE: &str = "secring.xc";

/// Record stored in a ring.
pub trait KeyRecord: Clone + Serialize + DeserializeOwned {
    fn fingerprint(&self) -> &str;
    fn public(&self) -> &PublicKey;
}

impl KeyRecord for PublicKey {
    fn fingerprint(&self) -> &str {
        PublicKey::fingerprint(self)
    }

    fn public(&self) -> &PublicKey {
        self
    }
}

impl KeyRecord for PrivateKey {
    fn fingerprint(&self) -> &str {
        PrivateKey::fingerprint(self)
    }

    fn public(&self) -> &PublicKey {
        PrivateKey::public(self)
    }
}

/// A catalog of keys, optionally backed by a file.
#[derive(Debug, Clone)]
pub struct Ring<K> {
    file: Option<PathBuf>,
    keys: BTreeMap<String, K>,
}

pub type Pubring = Ring<PublicKey>;
pub type Secring = Ring<PrivateKey>;

impl<K: KeyRecord> Ring<K> {
    /// A ring that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            file: None,
            keys: BTreeMap::new(),
        }
    }

    /// Load a ring; a missing file yields an empty ring bound to that path.
    pub fn load(file: &Path) -> Result<Self> {
        let mut ring = Self {
            file: Some(file.to_path_buf()),
            keys: BTreeMap::new(),
        };
        let buf = match fs::read(file) {
            Ok(buf) => buf,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(path = %file.display(), "keyring file absent");
                return Ok(ring);
            }
            Err(source) => {
                return Err(StorageError::Io {
                    path: file.display().to_string(),
                    source,
                }
                .into())
            }
        };
        if buf.is_empty() {
            return Ok(ring);
        }
        let records: Vec<K> = bincode::deserialize(&buf)
            .map_err(|e| CryptoError::Format(format!("{}: {e}", file.display())))?;
        for record in records {
            ring.keys.insert(record.fingerprint().to_string(), record);
        }
        debug!(path = %file.display(), keys = ring.keys.len(), "loaded keyring");
        Ok(ring)
    }

    /// Persist the ring if it is file backed.
    pub fn save(&self) -> Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let records: Vec<&K> = self.keys.values().collect();
        let buf = bincode::serialize(&records).map_err(|e| CryptoError::Format(e.to_string()))?;
        write_atomic(file, &buf)?;
        trace!(path = %file.display(), keys = records.len(), "saved keyring");
        Ok(())
    }

    /// Insert a record, replacing any record with the same fingerprint.
    pub fn insert(&mut self, key: K) {
        self.keys.insert(key.fingerprint().to_string(), key);
    }

    pub fn remove(&mut self, fingerprint: &str) -> Option<K> {
        self.keys.remove(fingerprint)
    }

    pub fn get(&self, fingerprint: &str) -> Option<&K> {
        self.keys.get(fingerprint)
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.keys.contains_key(fingerprint)
    }

    /// Resolve a needle to a fingerprint.
    ///
    /// Matches, in order: full fingerprint, fingerprint suffix (case
    /// insensitive, optional `0x`), exact email, exact name.
    pub fn find(&self, needle: &str) -> Option<&K> {
        let needle = needle.trim();
        if needle.is_empty() {
            return None;
        }
        if let Some(key) = self.keys.get(needle) {
            return Some(key);
        }
        let hex = needle
            .strip_prefix("0x")
            .or_else(|| needle.strip_prefix("0X"))
            .unwrap_or(needle)
            .to_ascii_uppercase();
        if hex.len() >= 8 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            if let Some(key) = self.keys.values().find(|k| k.fingerprint().ends_with(&hex)) {
                return Some(key);
            }
        }
        let email = needle.trim_start_matches('<').trim_end_matches('>');
        self.keys
            .values()
            .find(|k| k.public().identity().email.eq_ignore_ascii_case(email))
            .or_else(|| {
                self.keys
                    .values()
                    .find(|k| k.public().identity().name == needle)
            })
    }

    pub fn fingerprints(&self) -> Vec<String> {
        self.keys.keys().cloned().collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.keys.values()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

fn write_atomic(file: &Path, buf: &[u8]) -> Result<()> {
    let io_err = |source| StorageError::Io {
        path: file.display().to_string(),
        source,
    };
    let dir = file.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(io_err)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".cairn-")
        .tempfile_in(dir)
        .map_err(io_err)?;
    tmp.write_all(buf).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(FILE_MODE)).map_err(io_err)?;
    }
    #[cfg(not(unix))]
    let _ = FILE_MODE;
    tmp.persist(file).map_err(|e| io_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cipher::xc::key::{Identity, KdfParams};
    use secrecy::SecretString;
    use tempfile::TempDir;

    fn identity(name: &str) -> Identity {
        Identity {
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            comment: None,
        }
    }

    #[test]
    fn test_insert_replaces_by_fingerprint() {
        let mut ring = Pubring::in_memory();
        let a = PublicKey::new(identity("Alice"), [1; 32]);
        ring.insert(a.clone());
        ring.insert(PublicKey::new(identity("Bob"), [2; 32]));
        assert_eq!(ring.len(), 2);

        let renamed = PublicKey::new(identity("Alicia"), [1; 32]);
        ring.insert(renamed);
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.get(a.fingerprint()).unwrap().identity().name, "Alicia");
        assert!(ring.remove(a.fingerprint()).is_some());
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_find_by_suffix_email_and_name() {
        let mut ring = Pubring::in_memory();
        let a = PublicKey::new(identity("Alice"), [1; 32]);
        ring.insert(a.clone());
        ring.insert(PublicKey::new(identity("Bob"), [2; 32]));

        let fp = a.fingerprint().to_string();
        let suffix = &fp[fp.len() - 16..];
        assert_eq!(ring.find(suffix).unwrap().fingerprint(), fp);
        assert_eq!(
            ring.find(&format!("0x{}", suffix.to_lowercase()))
                .unwrap()
                .fingerprint(),
            fp
        );
        assert_eq!(ring.find("alice@example.com").unwrap().fingerprint(), fp);
        assert_eq!(ring.find("Alice").unwrap().fingerprint(), fp);
        assert!(ring.find("carol").is_none());
        assert!(ring.find("").is_none());
    }

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SECRING_FILE);
        let kdf = KdfParams::insecure_fast();
        let (key, _) =
            PrivateKey::generate(identity("Alice"), &SecretString::from("pw"), &kdf).unwrap();

        let mut ring = Secring::load(&path).unwrap();
        assert!(ring.is_empty());
        ring.insert(key.clone());
        ring.save().unwrap();

        let loaded = Secring::load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get(key.fingerprint()), Some(&key));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_corrupt_file_is_format_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(PUBRING_FILE);
        fs::write(&path, b"\xff\xff\xff\xff\xff\xff\xff\xff garbage").unwrap();
        let err = Pubring::load(&path).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Crypto(CryptoError::Format(_))
        ));
    }
}
