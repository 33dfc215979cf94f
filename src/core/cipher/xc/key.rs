//! XC key records.
//!
//! Public keys are X25519 points identified by a fingerprint derived from
//! the key bytes. Private keys are stored encrypted: Argon2id stretches the
//! passphrase and an XSalsa20-Poly1305 secretbox seals the 32-byte scalar.

use std::fmt;

use argon2::{Algorithm as KdfAlgorithm, Argon2, Params, Version};
use chrono::{DateTime, Utc};
use crypto_secretbox::aead::{Aead, KeyInit};
use crypto_secretbox::XSalsa20Poly1305;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
pub const SALT_LEN: usize = 16;

/// Bytes of the SHA-256 digest kept in a fingerprint.
const FINGERPRINT_BYTES: usize = 20;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub time: u32,
    pub memory_kib: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    /// time=4, memory=64 MiB, parallelism=4.
    fn default() -> Self {
        Self {
            time: 4,
            memory_kib: 64 * 1024,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests. Never use for real keys.
    pub fn insecure_fast() -> Self {
        Self {
            time: 1,
            memory_kib: 1024,
            parallelism: 1,
        }
    }

    fn derive(&self, passphrase: &SecretString, salt: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        let params = Params::new(self.memory_kib, self.time, self.parallelism, Some(KEY_LEN))
            .map_err(|e| CryptoError::Format(format!("argon2 params: {e}")))?;
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        Argon2::new(KdfAlgorithm::Argon2id, Version::V0x13, params)
            .hash_password_into(passphrase.expose_secret().as_bytes(), salt, key.as_mut())
            .map_err(|e| CryptoError::Format(format!("argon2: {e}")))?;
        Ok(key)
    }
}

/// Canonical fingerprint of public key bytes: uppercase hex of the first
/// 20 bytes of their SHA-256.
pub fn fingerprint(public_key: &[u8; KEY_LEN]) -> String {
    let digest = Sha256::digest(public_key);
    hex::encode_upper(&digest[..FINGERPRINT_BYTES])
}

/// Key algorithm tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    Nacl,
}

/// Owner of a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
    pub comment: Option<String>,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(comment) = self.comment.as_deref().filter(|c| !c.is_empty()) {
            write!(f, " ({comment})")?;
        }
        if !self.email.is_empty() {
            write!(f, " <{}>", self.email)?;
        }
        Ok(())
    }
}

/// A public key record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    fingerprint: String,
    creation_time: i64,
    algo: Algorithm,
    identity: Identity,
    public_key: [u8; KEY_LEN],
}

impl PublicKey {
    pub fn new(identity: Identity, public_key: [u8; KEY_LEN]) -> Self {
        Self {
            fingerprint: fingerprint(&public_key),
            creation_time: Utc::now().timestamp(),
            algo: Algorithm::Nacl,
            identity,
            public_key,
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn algo(&self) -> Algorithm {
        self.algo
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.creation_time, 0)
    }

    pub fn bytes(&self) -> &[u8; KEY_LEN] {
        &self.public_key
    }

    pub(crate) fn box_key(&self) -> crypto_box::PublicKey {
        crypto_box::PublicKey::from(self.public_key)
    }

    /// Check that the stored fingerprint matches the key bytes.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKey` on mismatch.
    pub fn verify(&self) -> Result<()> {
        if fingerprint(&self.public_key) != self.fingerprint {
            return Err(CryptoError::InvalidKey(format!(
                "fingerprint {} does not match key material",
                self.fingerprint
            ))
            .into());
        }
        Ok(())
    }

    /// Serialized form used for export and `.public-keys/`.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| CryptoError::Format(e.to_string()).into())
    }

    /// Parse and verify an exported public key.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let key: Self =
            bincode::deserialize(buf).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        key.verify()?;
        Ok(key)
    }
}

/// An unlocked private scalar. Wiped on drop.
#[derive(Clone)]
pub struct UnlockedKey {
    scalar: Zeroizing<[u8; KEY_LEN]>,
}

impl fmt::Debug for UnlockedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UnlockedKey(..)")
    }
}

impl UnlockedKey {
    pub(crate) fn box_key(&self) -> crypto_box::SecretKey {
        crypto_box::SecretKey::from(*self.scalar)
    }
}

/// A private key record; the scalar is only ever held encrypted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateKey {
    public: PublicKey,
    encrypted: Vec<u8>,
    nonce: [u8; NONCE_LEN],
    salt: [u8; SALT_LEN],
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("fingerprint", &self.public.fingerprint)
            .field("identity", &self.public.identity)
            .finish_non_exhaustive()
    }
}

fn secretbox(key: &[u8; KEY_LEN]) -> Result<XSalsa20Poly1305> {
    XSalsa20Poly1305::new_from_slice(key).map_err(|e| CryptoError::Format(e.to_string()).into())
}

impl PrivateKey {
    /// Generate a fresh key pair sealed under `passphrase`.
    pub fn generate(
        identity: Identity,
        passphrase: &SecretString,
        kdf: &KdfParams,
    ) -> Result<(Self, UnlockedKey)> {
        let mut scalar = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(scalar.as_mut());
        let secret = crypto_box::SecretKey::from(*scalar);
        let public = PublicKey::new(identity, *secret.public_key().as_bytes());

        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let derived = kdf.derive(passphrase, &salt)?;
        let encrypted = secretbox(&derived)?
            .encrypt(
                crypto_secretbox::aead::Nonce::<XSalsa20Poly1305>::from_slice(&nonce),
                scalar.as_ref(),
            )
            .map_err(|_| CryptoError::Encrypt("failed to seal private key".to_string()))?;

        Ok((
            Self {
                public,
                encrypted,
                nonce,
                salt,
            },
            UnlockedKey { scalar },
        ))
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn fingerprint(&self) -> &str {
        self.public.fingerprint()
    }

    /// Open the sealed scalar.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Locked` if the passphrase is wrong.
    pub fn unlock(&self, passphrase: &SecretString, kdf: &KdfParams) -> Result<UnlockedKey> {
        let derived = kdf.derive(passphrase, &self.salt)?;
        let opened = Zeroizing::new(
            secretbox(&derived)?
                .decrypt(
                    crypto_secretbox::aead::Nonce::<XSalsa20Poly1305>::from_slice(&self.nonce),
                    self.encrypted.as_slice(),
                )
                .map_err(|_| CryptoError::Locked(self.fingerprint().to_string()))?,
        );
        if opened.len() != KEY_LEN {
            return Err(CryptoError::InvalidKey(self.fingerprint().to_string()).into());
        }
        let mut scalar = Zeroizing::new([0u8; KEY_LEN]);
        scalar.copy_from_slice(&opened);

        let derived_public = crypto_box::SecretKey::from(*scalar).public_key();
        if derived_public.as_bytes() != self.public.bytes() {
            return Err(CryptoError::InvalidKey(self.fingerprint().to_string()).into());
        }
        Ok(UnlockedKey { scalar })
    }

    /// Serialized encrypted-at-rest form.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| CryptoError::Format(e.to_string()).into())
    }

    /// Parse an exported private key.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let key: Self =
            bincode::deserialize(buf).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        key.public.verify()?;
        Ok(key)
    }
}
