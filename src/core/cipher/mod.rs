//! Cryptographic backends.
//!
//! Provides the encryption abstraction shared by every leaf store and its
//! implementations.
//!
//! ## Backends
//!
//! - **gpg**: GnuPG through the `gpg` CLI, `.gpg` files, `.gpg-id` lists.
//! - **age**: x25519 age recipients, `.age` files, `.age-recipients` lists.
//! - **xc**: in-tree hybrid scheme with its own keyring, `.xc` files.
//! - **plain**: identity transform for tests, `.txt` files.
//!
//! ## Adding a New Backend
//!
//! 1. Implement `Keyring` and `Crypto`
//! 2. Add the implementation in a new file
//! 3. Add a variant to `CryptoBackend` and load it in `Registry`

use std::fmt;

use secrecy::SecretString;
use zeroize::Zeroizing;

use crate::core::context::Options;
use crate::error::Result;

mod age;
mod backend;
mod gpg;
mod plain;
pub mod xc;

pub use age::Age;
pub use backend::{CryptoBackend, CryptoSettings, Registry};
pub use gpg::Gpg;
pub use plain::Plain;
pub use xc::Xc;

/// Key management half of a crypto backend.
///
/// Recipient identifiers are backend specific: fingerprints for gpg and
/// xc, `age1...` public keys for age.
pub trait Keyring {
    /// Add a public key to the local keyring.
    fn import_public_key(&self, opts: &Options, buf: &[u8]) -> Result<()>;

    /// Serialize a public key so collaborators can import it.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::KeyNotFound` if `id` is unknown.
    fn export_public_key(&self, opts: &Options, id: &str) -> Result<Vec<u8>>;

    /// Every public key we could encrypt to.
    fn list_recipients(&self, opts: &Options) -> Result<Vec<String>>;

    /// Every key we can decrypt with.
    fn list_identities(&self, opts: &Options) -> Result<Vec<String>>;

    /// Resolve needles (ids, id suffixes, emails) to usable recipients.
    fn find_recipients(&self, opts: &Options, needles: &[String]) -> Result<Vec<String>>;

    /// Resolve needles to keys we hold privately.
    fn find_identities(&self, opts: &Options, needles: &[String]) -> Result<Vec<String>>;

    /// Canonical identifier for `id`, or `id` unchanged if it does not resolve.
    fn fingerprint(&self, opts: &Options, id: &str) -> String;

    /// Human-readable description of a key.
    fn format_key(&self, opts: &Options, id: &str) -> String;

    /// Names found inside an exported public key.
    fn read_names_from_key(&self, opts: &Options, buf: &[u8]) -> Result<Vec<String>>;

    /// Generate a new private key and return its identifier.
    fn create_private_key(
        &self,
        opts: &Options,
        name: &str,
        email: &str,
        passphrase: &SecretString,
    ) -> Result<String>;

    /// Whether recipient keys should be exported into the store.
    fn exports_public_keys(&self) -> bool {
        true
    }
}

/// Encryption backend trait.
pub trait Crypto: Keyring + Send + Sync + fmt::Debug {
    /// Stable backend identifier.
    fn name(&self) -> &'static str;

    /// Ciphertext file extension, without the dot.
    fn ext(&self) -> &'static str;

    /// Recipient list filename.
    fn id_file(&self) -> &'static str;

    /// Upper bound on parallel operations this backend tolerates.
    fn max_concurrency(&self) -> usize {
        usize::MAX
    }

    /// Encrypt plaintext for every recipient.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Encrypt` if a recipient can not be used.
    fn encrypt(&self, opts: &Options, plaintext: &[u8], recipients: &[String]) -> Result<Vec<u8>>;

    /// Decrypt ciphertext with any local identity.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Decrypt` on any authentication failure.
    fn decrypt(&self, opts: &Options, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>>;

    /// Sorted recipients a ciphertext was encrypted to.
    fn recipient_ids(&self, opts: &Options, ciphertext: &[u8]) -> Result<Vec<String>>;
}
