//! Cairn - a hierarchical, multi-recipient encrypted secret store.
//!
//! Stores are directory trees laid out like pass(1): one encrypted file
//! per secret, a recipient list at the root and optionally in any
//! subdirectory, and an optional git repository tracking every change.
//! Additional stores can be mounted into the namespace of the root store.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── core/
//! │   ├── storage/      # Path-safe file access, versioning hook
//! │   ├── rcs/          # git and no-op versioning backends
//! │   ├── cipher/       # gpg, age, xc and plain crypto backends
//! │   │   └── xc/       # Native hybrid engine and keyring
//! │   ├── agent         # Passphrase cache
//! │   ├── queue         # Background commit queue
//! │   ├── leaf/         # One store: secrets, recipients, fsck
//! │   ├── root/         # Mount routing over many leaf stores
//! │   ├── tree          # Tree view of a store
//! │   ├── config        # TOML configuration
//! │   └── context       # Per-call options
//! └── logging           # tracing subscriber setup
//! ```

pub mod core;
pub mod error;
pub mod logging;

pub use crate::core::context::Options;
pub use crate::core::leaf::Leaf;
pub use crate::core::root::Root;
pub use crate::error::{Error, Result};
