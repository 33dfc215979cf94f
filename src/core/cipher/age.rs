//! Age encryption backend.
//!
//! Recipients are `age1...` x25519 public keys; the recipient string is the
//! key itself, so nothing is exported into the store. Identities live one per
//! line in `<dir>/identities`, additional known recipients in
//! `<dir>/recipients`.

use std::collections::BTreeSet;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use ::age::x25519;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, trace};
use zeroize::Zeroizing;

use super::{Crypto, Keyring};
use crate::core::constants::FILE_MODE;
use crate::core::context::Options;
use crate::error::{CryptoError, Result, StorageError};

pub const IDENTITIES_FILE: &str = "identities";
pub const RECIPIENTS_FILE: &str = "recipients";

/// Age backend using x25519 keys.
pub struct Age {
    dir: Option<PathBuf>,
    identities: Mutex<Option<Vec<x25519::Identity>>>,
    extra: Mutex<BTreeSet<String>>,
}

impl std::fmt::Debug for Age {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Age").field("dir", &self.dir).finish_non_exhaustive()
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(io_error(path, e).into()),
    }
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
    }
    let mut options = fs::OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(FILE_MODE);
    }
    #[cfg(not(unix))]
    let _ = FILE_MODE;
    let mut file = options.open(path).map_err(|e| io_error(path, e))?;
    writeln!(file, "{line}").map_err(|e| io_error(path, e))?;
    Ok(())
}

/// Parse a public key string into an age recipient.
///
/// # Errors
///
/// Returns `CryptoError::InvalidKey` if the key format is invalid.
pub fn parse_recipient(key: &str) -> Result<x25519::Recipient> {
    key.trim()
        .parse::<x25519::Recipient>()
        .map_err(|_| CryptoError::InvalidKey(key.to_string()).into())
}

impl Age {
    /// Backend reading keys from `dir`.
    pub fn open(dir: &Path) -> Self {
        Self {
            dir: Some(dir.to_path_buf()),
            identities: Mutex::new(None),
            extra: Mutex::new(BTreeSet::new()),
        }
    }

    /// Backend that keeps generated keys in memory only.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            identities: Mutex::new(Some(Vec::new())),
            extra: Mutex::new(BTreeSet::new()),
        }
    }

    fn identities(&self) -> Result<MutexGuard<'_, Option<Vec<x25519::Identity>>>> {
        let mut guard = self.identities.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            let mut loaded = Vec::new();
            if let Some(dir) = &self.dir {
                let path = dir.join(IDENTITIES_FILE);
                for line in read_lines(&path)? {
                    let identity = line
                        .parse::<x25519::Identity>()
                        .map_err(|e| CryptoError::InvalidKey(format!("{}: {e}", path.display())))?;
                    loaded.push(identity);
                }
                debug!(path = %path.display(), count = loaded.len(), "loaded age identities");
            }
            *guard = Some(loaded);
        }
        Ok(guard)
    }

    fn identity_ids(&self) -> Result<Vec<String>> {
        let guard = self.identities()?;
        Ok(guard
            .iter()
            .flatten()
            .map(|i| i.to_public().to_string())
            .collect())
    }

    fn known_recipients(&self) -> Result<BTreeSet<String>> {
        let mut known: BTreeSet<String> = self.identity_ids()?.into_iter().collect();
        if let Some(dir) = &self.dir {
            known.extend(read_lines(&dir.join(RECIPIENTS_FILE))?);
        }
        known.extend(
            self.extra
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .cloned(),
        );
        Ok(known)
    }
}

impl Keyring for Age {
    fn import_public_key(&self, _opts: &Options, buf: &[u8]) -> Result<()> {
        let text = std::str::from_utf8(buf)
            .map_err(|_| CryptoError::InvalidKey("age recipient is not UTF-8".into()))?;
        let known = self.known_recipients()?;
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            parse_recipient(line)?;
            if known.contains(line) {
                continue;
            }
            match &self.dir {
                Some(dir) => append_line(&dir.join(RECIPIENTS_FILE), line)?,
                None => {
                    self.extra
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(line.to_string());
                }
            }
            debug!(recipient = line, "imported age recipient");
        }
        Ok(())
    }

    fn export_public_key(&self, _opts: &Options, id: &str) -> Result<Vec<u8>> {
        parse_recipient(id).map_err(|_| CryptoError::KeyNotFound(id.to_string()))?;
        Ok(format!("{}\n", id.trim()).into_bytes())
    }

    fn list_recipients(&self, _opts: &Options) -> Result<Vec<String>> {
        Ok(self.known_recipients()?.into_iter().collect())
    }

    fn list_identities(&self, _opts: &Options) -> Result<Vec<String>> {
        self.identity_ids()
    }

    fn find_recipients(&self, _opts: &Options, needles: &[String]) -> Result<Vec<String>> {
        let mut found: Vec<String> = Vec::new();
        for needle in needles.iter().map(|n| n.trim()) {
            if parse_recipient(needle).is_ok() && !found.iter().any(|f| f == needle) {
                found.push(needle.to_string());
            }
        }
        Ok(found)
    }

    fn find_identities(&self, opts: &Options, needles: &[String]) -> Result<Vec<String>> {
        let ours = self.identity_ids()?;
        Ok(self
            .find_recipients(opts, needles)?
            .into_iter()
            .filter(|r| ours.contains(r))
            .collect())
    }

    fn fingerprint(&self, _opts: &Options, id: &str) -> String {
        id.trim().to_string()
    }

    fn format_key(&self, _opts: &Options, id: &str) -> String {
        id.to_string()
    }

    fn read_names_from_key(&self, _opts: &Options, buf: &[u8]) -> Result<Vec<String>> {
        let text = String::from_utf8_lossy(buf);
        text.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| parse_recipient(l).map(|r| r.to_string()))
            .collect()
    }

    fn create_private_key(
        &self,
        _opts: &Options,
        _name: &str,
        _email: &str,
        _passphrase: &SecretString,
    ) -> Result<String> {
        let identity = x25519::Identity::generate();
        let public = identity.to_public().to_string();
        let mut guard = self.identities()?;
        if let Some(dir) = &self.dir {
            let secret = identity.to_string();
            append_line(&dir.join(IDENTITIES_FILE), secret.expose_secret())?;
        }
        guard.get_or_insert_with(Vec::new).push(identity);
        debug!(recipient = %public, "generated age identity");
        Ok(public)
    }

    fn exports_public_keys(&self) -> bool {
        false
    }
}

impl Crypto for Age {
    fn name(&self) -> &'static str {
        "age"
    }

    fn ext(&self) -> &'static str {
        "age"
    }

    fn id_file(&self) -> &'static str {
        ".age-recipients"
    }

    fn encrypt(&self, _opts: &Options, plaintext: &[u8], recipients: &[String]) -> Result<Vec<u8>> {
        let recipients = recipients
            .iter()
            .map(|r| {
                parse_recipient(r).map_err(|_| CryptoError::Encrypt(format!("invalid recipient {r}")))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        trace!(
            recipients = recipients.len(),
            plaintext_len = plaintext.len(),
            "encrypting"
        );

        let encryptor =
            ::age::Encryptor::with_recipients(recipients.iter().map(|r| r as &dyn ::age::Recipient))
                .map_err(|e| CryptoError::Encrypt(e.to_string()))?;
        let mut encrypted = Vec::new();
        let mut writer = encryptor
            .wrap_output(&mut encrypted)
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;
        writer.write_all(plaintext)?;
        writer
            .finish()
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

        trace!(ciphertext_len = encrypted.len(), "encrypted");
        Ok(encrypted)
    }

    fn decrypt(&self, _opts: &Options, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let guard = self.identities()?;
        let identities: Vec<&x25519::Identity> = guard.iter().flatten().collect();
        if identities.is_empty() {
            return Err(CryptoError::NoIdentity.into());
        }
        trace!(ciphertext_len = ciphertext.len(), "decrypting");

        // Accepts both binary and ASCII-armored input.
        let reader = ::age::armor::ArmoredReader::new(ciphertext);
        let decryptor = ::age::Decryptor::new(reader).map_err(|e| {
            debug!(error = %e, "age header rejected");
            CryptoError::Decrypt
        })?;
        let mut reader = decryptor
            .decrypt(identities.iter().map(|i| *i as &dyn ::age::Identity))
            .map_err(|e| {
                debug!(error = %e, "age decryption failed");
                CryptoError::Decrypt
            })?;
        let mut decrypted = Zeroizing::new(Vec::new());
        reader
            .read_to_end(&mut decrypted)
            .map_err(|_| CryptoError::Decrypt)?;
        trace!(plaintext_len = decrypted.len(), "decrypted");
        Ok(decrypted)
    }

    fn recipient_ids(&self, _opts: &Options, _ciphertext: &[u8]) -> Result<Vec<String>> {
        Err(CryptoError::Unsupported {
            backend: "age",
            operation: "recipient inspection",
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(age: &Age) -> String {
        age.create_private_key(&Options::default(), "", "", &SecretString::from(""))
            .unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let age = Age::in_memory();
        let opts = Options::default();
        let id = key(&age);
        let ct = age.encrypt(&opts, b"Hello, World!", &[id]).unwrap();
        assert_ne!(ct.as_slice(), b"Hello, World!");
        assert_eq!(age.decrypt(&opts, &ct).unwrap().as_slice(), b"Hello, World!");
    }

    #[test]
    fn test_encrypt_with_multiple_recipients() {
        let a = Age::in_memory();
        let b = Age::in_memory();
        let opts = Options::default();
        let ids = vec![key(&a), key(&b)];
        let ct = a.encrypt(&opts, b"Shared secret", &ids).unwrap();
        assert_eq!(a.decrypt(&opts, &ct).unwrap().as_slice(), b"Shared secret");
        assert_eq!(b.decrypt(&opts, &ct).unwrap().as_slice(), b"Shared secret");
    }

    #[test]
    fn test_wrong_identity_fails() {
        let a = Age::in_memory();
        let b = Age::in_memory();
        let opts = Options::default();
        key(&b);
        let ct = a.encrypt(&opts, b"x", &[key(&a)]).unwrap();
        let err = b.decrypt(&opts, &ct).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Crypto(CryptoError::Decrypt)
        ));
    }

    #[test]
    fn test_invalid_recipient() {
        let age = Age::in_memory();
        let err = age
            .encrypt(&Options::default(), b"x", &["not-a-key".into()])
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Crypto(CryptoError::Encrypt(_))
        ));
    }

    #[test]
    fn test_identities_persist() {
        let dir = TempDir::new().unwrap();
        let opts = Options::default();
        let id = key(&Age::open(dir.path()));

        let reopened = Age::open(dir.path());
        assert_eq!(reopened.list_identities(&opts).unwrap(), vec![id.clone()]);
        let ct = reopened.encrypt(&opts, b"x", &[id]).unwrap();
        assert_eq!(reopened.decrypt(&opts, &ct).unwrap().as_slice(), b"x");
    }

    #[test]
    fn test_import_recipient() {
        let dir = TempDir::new().unwrap();
        let opts = Options::default();
        let age = Age::open(dir.path());
        let other = key(&Age::in_memory());
        age.import_public_key(&opts, other.as_bytes()).unwrap();
        age.import_public_key(&opts, other.as_bytes()).unwrap();
        assert_eq!(age.list_recipients(&opts).unwrap(), vec![other.clone()]);
        assert!(age.list_identities(&opts).unwrap().is_empty());
        assert!(age.import_public_key(&opts, b"garbage").is_err());
        assert_eq!(
            age.find_recipients(&opts, &[other.clone(), "nope".into()])
                .unwrap(),
            vec![other]
        );
    }
}
