//! Domain types.

pub mod audit;
mod recipient;
mod revision;
mod secret;

pub use audit::{Finding, FsckReport, Severity};
pub use recipient::Recipients;
pub use revision::Revision;
pub use secret::Secret;
