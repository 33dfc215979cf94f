//! Core library components.
//!
//! Storage and versioning sit at the bottom, crypto backends next to them;
//! leaf and root stores combine both.

pub mod agent;
pub mod cipher;
pub mod config;
pub mod constants;
pub mod context;
pub mod domain;
pub mod leaf;
pub mod queue;
pub mod rcs;
pub mod root;
pub mod storage;
pub mod tree;
pub mod types;
pub mod validation;
