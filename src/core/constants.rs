//! Constants used throughout cairn.
//!
//! Centralizes well-known filenames and limits.

/// Template file held alongside secrets.
pub const TEMPLATE_FILE: &str = ".pass-template";

/// Directory holding exported recipient public keys.
pub const PUBLIC_KEY_DIR: &str = ".public-keys";

/// Maximum number of parents visited when resolving a governing list.
pub const MAX_PARENT_WALK: usize = 100;

/// Directory permissions for everything the store creates.
pub const DIR_MODE: u32 = 0o700;

/// File permissions for everything the store creates.
pub const FILE_MODE: u32 = 0o600;

/// Default clipboard timeout in seconds.
pub const DEFAULT_CLIP_TIMEOUT: u64 = 45;

/// Environment variable overriding the default store location.
pub const STORE_DIR_ENV: &str = "PASSWORD_STORE_DIR";

/// Default store directory relative to HOME.
pub const DEFAULT_STORE_DIR: &str = ".password-store";

/// Configuration directory name under the platform config dir.
pub const APP_DIR: &str = "cairn";

/// Configuration filename inside the application directory.
pub const CONFIG_FILE: &str = "config.toml";
