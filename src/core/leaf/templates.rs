//! Secret templates.
//!
//! A template is a plain `.pass-template` file in a directory. New secrets
//! created below that directory start from the deepest template above them.

use tracing::debug;

use super::Leaf;
use crate::core::constants::{MAX_PARENT_WALK, TEMPLATE_FILE};
use crate::core::context::Options;
use crate::core::validation;
use crate::error::{ErrorKind, Result};

impl Leaf {
    fn template_path(name: &str) -> Result<String> {
        Ok(validation::join(&validation::clean(name)?, TEMPLATE_FILE))
    }

    /// Deepest template governing the secret `name`, as path and content.
    pub fn lookup_template(&self, opts: &Options, name: &str) -> Option<(String, Vec<u8>)> {
        let name = validation::clean(name).ok()?;
        let mut dir = validation::parent(&name);
        for _ in 0..MAX_PARENT_WALK {
            let path = validation::join(dir, TEMPLATE_FILE);
            if let Ok(content) = self.storage.get(opts, &path) {
                debug!(template = %path, name = %name, "found template");
                return Some((path, content));
            }
            if dir.is_empty() {
                break;
            }
            dir = validation::parent(dir);
        }
        None
    }

    /// Directories carrying a template, sorted; `""` is the store root.
    pub fn list_templates(&self, opts: &Options) -> Result<Vec<String>> {
        let mut dirs: Vec<String> = self
            .storage
            .list(opts, "")?
            .into_iter()
            .filter(|p| validation::basename(p) == TEMPLATE_FILE)
            .map(|p| validation::parent(&p).to_string())
            .collect();
        dirs.sort();
        dirs.dedup();
        Ok(dirs)
    }

    pub fn has_template(&self, opts: &Options, name: &str) -> bool {
        Self::template_path(name)
            .map(|p| self.storage.exists(opts, &p))
            .unwrap_or(false)
    }

    pub fn get_template(&self, opts: &Options, name: &str) -> Result<Vec<u8>> {
        self.storage.get(opts, &Self::template_path(name)?)
    }

    /// Write the template for directory `name`.
    pub fn set_template(&self, opts: &Options, name: &str, content: &[u8]) -> Result<()> {
        let path = Self::template_path(name)?;
        match self.storage.set(opts, &path, content) {
            Err(e) if e.kind() == ErrorKind::MeaninglessWrite => return Ok(()),
            other => other?,
        }
        self.commit(opts, &[path], format!("Save template for {name}"))
    }

    pub fn remove_template(&self, opts: &Options, name: &str) -> Result<()> {
        let path = Self::template_path(name)?;
        self.storage.delete(opts, &path)?;
        self.commit(opts, &[path], format!("Remove template for {name}"))
    }
}
