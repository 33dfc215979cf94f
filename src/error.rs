//! Error types.
//!
//! Every subsystem has its own error enum; all of them fold into [`Error`]
//! so callers can match on the layer that failed or ask for a coarse
//! [`ErrorKind`] and a host exit code.

use thiserror::Error;

/// Top-level error for all cairn operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Rcs(#[from] RcsError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a storage backend.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("entry not found: {0}")]
    NotFound(String),

    #[error("meaningless write: {0} already has this content")]
    MeaninglessWrite(String),

    #[error("path escapes store root: {0}")]
    Sneaky(String),

    #[error("symlink loop detected at {0}")]
    SymlinkLoop(String),

    #[error("storage io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by a versioning backend.
///
/// `NotInitialized`, `NoRemote` and `NothingToCommit` are soft: store
/// operations log them and carry on.
#[derive(Error, Debug)]
pub enum RcsError {
    #[error("repository not initialized")]
    NotInitialized,

    #[error("no remote configured: {0}")]
    NoRemote(String),

    #[error("nothing to commit")]
    NothingToCommit,

    #[error("versioning tool unavailable: {0}")]
    Unavailable(String),

    #[error("`{command}` failed: {stderr}")]
    Command { command: String, stderr: String },
}

impl RcsError {
    /// Whether this error should be downgraded to a warning.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Self::NotInitialized | Self::NoRemote(_) | Self::NothingToCommit
        )
    }
}

/// Errors raised by a crypto backend or keyring.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Decryption failed. The message never says why.
    #[error("decryption failed")]
    Decrypt,

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("no usable private key on this keyring")]
    NoIdentity,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("key {0} is locked: wrong passphrase")]
    Locked(String),

    #[error("{backend}: {operation} is not supported")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    #[error("malformed data: {0}")]
    Format(String),

    #[error("{tool}: {message}")]
    Tool { tool: &'static str, message: String },

    #[error("unknown crypto backend: {0}")]
    UnknownBackend(String),
}

/// Errors raised by leaf and root stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store not initialized: {0}")]
    NotInitialized(String),

    #[error("{0} is already mounted")]
    AlreadyMounted(String),

    #[error("{0} is not mounted")]
    NotMounted(String),

    #[error("{0} is a mount point; unmount it instead")]
    MountPoint(String),

    #[error("can not prune {prefix}: mount {mount} lives beneath it")]
    PruneMount { prefix: String, mount: String },

    #[error("path {path} is already used by mount {alias}")]
    DuplicatePath { path: String, alias: String },

    #[error("{0} is a directory")]
    IsDirectory(String),

    #[error("can not move directory {from} onto file {to}")]
    DestinationIsFile { from: String, to: String },

    #[error("invalid secret name {name}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("refusing to save an empty recipient list")]
    EmptyRecipients,

    #[error("recipient {0} is not in this store")]
    RecipientNotInStore(String),

    #[error("recipient list hash mismatch for store {alias}")]
    InvalidHash { alias: String },

    #[error("failed to re-encrypt {} secrets: {}", .0.len(), .0.join(", "))]
    Reencrypt(Vec<String>),
}

/// Informational errors from the secret parser.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SecretError {
    #[error("secret is empty")]
    Empty,

    #[error("secret has no body")]
    NoBody,

    #[error("secret has no password")]
    NoPassword,

    #[error("body has no YAML document marker")]
    YamlNoMark,

    #[error("key not found: {0}")]
    YamlNoKey(String),

    #[error("unsupported YAML value for {0}")]
    YamlUnsupported(String),

    #[error("invalid YAML: {0}")]
    Yaml(String),
}

/// Errors raised while loading or saving configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Decrypt,
    Encrypt,
    Io,
    Sneaky,
    MeaninglessWrite,
    EmptySecret,
    NotInitialized,
    AlreadyMounted,
    Cancelled,
    NoKey,
    Usage,
    Other,
}

/// Exit code for failures without a more specific mapping.
pub const EXIT_UNKNOWN: i32 = 1;
/// Exit code for invalid arguments and rejected paths.
pub const EXIT_USAGE: i32 = 2;
/// Exit code for missing secrets.
pub const EXIT_NOT_FOUND: i32 = 11;
/// Exit code for decryption failures.
pub const EXIT_DECRYPT: i32 = 12;
/// Exit code for encryption failures.
pub const EXIT_ENCRYPT: i32 = 13;
/// Exit code when no usable key is available.
pub const EXIT_NO_KEY: i32 = 14;
/// Exit code for storage failures.
pub const EXIT_IO: i32 = 15;

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Storage(e) => match e {
                StorageError::NotFound(_) => ErrorKind::NotFound,
                StorageError::MeaninglessWrite(_) => ErrorKind::MeaninglessWrite,
                StorageError::Sneaky(_) => ErrorKind::Sneaky,
                StorageError::SymlinkLoop(_) | StorageError::Io { .. } => ErrorKind::Io,
            },
            Self::Rcs(_) => ErrorKind::Other,
            Self::Crypto(e) => match e {
                CryptoError::Decrypt | CryptoError::Locked(_) => ErrorKind::Decrypt,
                CryptoError::Encrypt(_) => ErrorKind::Encrypt,
                CryptoError::KeyNotFound(_) | CryptoError::NoIdentity => ErrorKind::NoKey,
                _ => ErrorKind::Other,
            },
            Self::Store(e) => match e {
                StoreError::NotInitialized(_) => ErrorKind::NotInitialized,
                StoreError::AlreadyMounted(_) => ErrorKind::AlreadyMounted,
                StoreError::InvalidName { .. }
                | StoreError::MountPoint(_)
                | StoreError::PruneMount { .. }
                | StoreError::IsDirectory(_)
                | StoreError::DestinationIsFile { .. }
                | StoreError::AlreadyExists(_) => ErrorKind::Usage,
                _ => ErrorKind::Other,
            },
            Self::Secret(SecretError::Empty) => ErrorKind::EmptySecret,
            Self::Secret(_) => ErrorKind::Other,
            Self::Config(_) => ErrorKind::Usage,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Exit code a CLI host should use for this error.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Usage | ErrorKind::Sneaky => EXIT_USAGE,
            ErrorKind::NotFound => EXIT_NOT_FOUND,
            ErrorKind::Decrypt => EXIT_DECRYPT,
            ErrorKind::Encrypt => EXIT_ENCRYPT,
            ErrorKind::NoKey => EXIT_NO_KEY,
            ErrorKind::Io => EXIT_IO,
            _ => EXIT_UNKNOWN,
        }
    }

    /// Whether this is a storage `NotFound`.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Whether this is a soft versioning failure.
    pub fn is_soft_rcs(&self) -> bool {
        matches!(self, Self::Rcs(e) if e.is_soft())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let errors: Vec<Error> = vec![
            StoreError::InvalidName {
                name: "a//b".into(),
                reason: "empty segment".into(),
            }
            .into(),
            StorageError::NotFound("x".into()).into(),
            CryptoError::Decrypt.into(),
            CryptoError::Encrypt("no recipients".into()).into(),
            CryptoError::NoIdentity.into(),
            StorageError::Io {
                path: "x".into(),
                source: std::io::Error::other("disk"),
            }
            .into(),
            RcsError::NothingToCommit.into(),
        ];
        let mut codes: Vec<i32> = errors.iter().map(Error::exit_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), 7);
    }

    #[test]
    fn test_decrypt_message_is_opaque() {
        let err: Error = CryptoError::Decrypt.into();
        assert_eq!(err.to_string(), "decryption failed");
    }

    #[test]
    fn test_soft_rcs_errors() {
        assert!(Error::from(RcsError::NotInitialized).is_soft_rcs());
        assert!(Error::from(RcsError::NoRemote("origin".into())).is_soft_rcs());
        assert!(Error::from(RcsError::NothingToCommit).is_soft_rcs());
        assert!(!Error::from(RcsError::Command {
            command: "git add".into(),
            stderr: "fatal".into()
        })
        .is_soft_rcs());
    }
}
