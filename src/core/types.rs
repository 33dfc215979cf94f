//! Type aliases for domain concepts.
//!
//! Provides semantic type aliases to make function signatures more descriptive.

/// A normalized, slash-separated secret path without extension.
pub type SecretName = String;

/// A canonical recipient identifier (uppercase hex for xc and gpg).
pub type Fingerprint = String;

/// A mount alias; the empty string is the root store.
pub type Alias = String;
