//! No-op versioning for stores without a repository.

use super::Rcs;
use crate::core::context::Options;
use crate::core::domain::Revision;
use crate::error::{RcsError, Result};

/// Versioning backend that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct Noop;

impl Rcs for Noop {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn is_initialized(&self) -> bool {
        false
    }

    fn add(&self, _opts: &Options, _paths: &[&str]) -> Result<()> {
        Ok(())
    }

    fn commit(&self, _opts: &Options, _message: &str) -> Result<()> {
        Ok(())
    }

    fn push(&self, _opts: &Options, _remote: Option<&str>, _branch: Option<&str>) -> Result<()> {
        Ok(())
    }

    fn pull(&self, _opts: &Options, _remote: Option<&str>, _branch: Option<&str>) -> Result<()> {
        Ok(())
    }

    fn add_remote(&self, _opts: &Options, _name: &str, _url: &str) -> Result<()> {
        Err(RcsError::NotInitialized.into())
    }

    fn remove_remote(&self, _opts: &Options, name: &str) -> Result<()> {
        Err(RcsError::NoRemote(name.to_string()).into())
    }

    fn status(&self, _opts: &Options) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn revisions(&self, _opts: &Options, _name: &str) -> Result<Vec<Revision>> {
        Ok(vec![Revision::latest()])
    }

    fn get_revision(&self, _opts: &Options, _name: &str, _revision: &str) -> Result<Vec<u8>> {
        Err(RcsError::NotInitialized.into())
    }

    fn compact(&self, _opts: &Options) -> Result<()> {
        Ok(())
    }

    fn init_config(&self, _opts: &Options, _name: &str, _email: &str) -> Result<()> {
        Ok(())
    }
}
