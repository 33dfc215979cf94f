//! Identity "encryption" for tests and demos.

use secrecy::SecretString;
use zeroize::Zeroizing;

use super::{Crypto, Keyring};
use crate::core::context::Options;
use crate::error::{CryptoError, Result};

/// Static recipient list every plain keyring reports.
pub const PLAIN_RECIPIENTS: [&str; 2] = ["0xDEADBEEF", "0xFEEDBEEF"];

/// No-op backend: ciphertext equals plaintext.
#[derive(Debug, Default, Clone, Copy)]
pub struct Plain;

impl Plain {
    fn unsupported(operation: &'static str) -> CryptoError {
        CryptoError::Unsupported {
            backend: "plain",
            operation,
        }
    }

    fn lookup(needle: &str) -> Option<&'static str> {
        let needle = needle.trim();
        let bare = needle.trim_start_matches("0x").to_ascii_uppercase();
        if bare.is_empty() {
            return None;
        }
        PLAIN_RECIPIENTS
            .iter()
            .copied()
            .find(|id| *id == needle || id.ends_with(&bare))
    }
}

impl Keyring for Plain {
    fn import_public_key(&self, _opts: &Options, _buf: &[u8]) -> Result<()> {
        Ok(())
    }

    fn export_public_key(&self, _opts: &Options, id: &str) -> Result<Vec<u8>> {
        Self::lookup(id)
            .map(|id| id.as_bytes().to_vec())
            .ok_or_else(|| CryptoError::KeyNotFound(id.to_string()).into())
    }

    fn list_recipients(&self, _opts: &Options) -> Result<Vec<String>> {
        Ok(PLAIN_RECIPIENTS.iter().map(|s| s.to_string()).collect())
    }

    fn list_identities(&self, opts: &Options) -> Result<Vec<String>> {
        self.list_recipients(opts)
    }

    fn find_recipients(&self, _opts: &Options, needles: &[String]) -> Result<Vec<String>> {
        let mut found: Vec<String> = Vec::new();
        for id in needles.iter().filter_map(|n| Self::lookup(n)) {
            if !found.iter().any(|f| f == id) {
                found.push(id.to_string());
            }
        }
        Ok(found)
    }

    fn find_identities(&self, opts: &Options, needles: &[String]) -> Result<Vec<String>> {
        self.find_recipients(opts, needles)
    }

    fn fingerprint(&self, _opts: &Options, id: &str) -> String {
        id.to_string()
    }

    fn format_key(&self, _opts: &Options, id: &str) -> String {
        id.to_string()
    }

    fn read_names_from_key(&self, _opts: &Options, _buf: &[u8]) -> Result<Vec<String>> {
        Ok(vec!["unsupported".to_string()])
    }

    fn create_private_key(
        &self,
        _opts: &Options,
        _name: &str,
        _email: &str,
        _passphrase: &SecretString,
    ) -> Result<String> {
        Err(Self::unsupported("key generation").into())
    }

    fn exports_public_keys(&self) -> bool {
        false
    }
}

impl Crypto for Plain {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn ext(&self) -> &'static str {
        "txt"
    }

    fn id_file(&self) -> &'static str {
        ".plain-id"
    }

    fn encrypt(&self, _opts: &Options, plaintext: &[u8], _recipients: &[String]) -> Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, _opts: &Options, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        Ok(Zeroizing::new(ciphertext.to_vec()))
    }

    fn recipient_ids(&self, _opts: &Options, _ciphertext: &[u8]) -> Result<Vec<String>> {
        Err(Self::unsupported("recipient inspection").into())
    }
}
