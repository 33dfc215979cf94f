//! Git versioning through the `git` CLI.
//!
//! Every call runs `git -C <root>` non-interactively. Push and pull are
//! skipped entirely when `no_network` is set.

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use super::Rcs;
use crate::core::context::Options;
use crate::core::domain::Revision;
use crate::error::{RcsError, Result};

const FIELD_SEP: char = '\x1f';
const RECORD_SEP: char = '\x1e';
const LOG_FORMAT: &str = "--format=%H%x1f%an%x1f%ae%x1f%at%x1f%s%x1f%b%x1e";

/// Git repository at a store root.
#[derive(Debug, Clone)]
pub struct Git {
    root: PathBuf,
    binary: Option<PathBuf>,
}

impl Git {
    /// Attach to an existing (or future) repository at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            binary: which::which("git").ok(),
        }
    }

    /// Whether a `git` binary is on PATH.
    pub fn available() -> bool {
        which::which("git").is_ok()
    }

    /// Create a repository and configure its author identity.
    ///
    /// Falls back to the login name when `opts` carries no author.
    ///
    /// # Errors
    ///
    /// Returns `RcsError::Unavailable` without a `git` binary, or
    /// `RcsError::Command` if `git init` fails.
    pub fn init(opts: &Options, root: impl Into<PathBuf>) -> Result<Self> {
        let git = Self::open(root);
        std::fs::create_dir_all(&git.root)?;
        git.run(opts, &["init", "--quiet"])?;

        let name = opts.username.clone().unwrap_or_else(whoami::username);
        let email = opts.email.clone().unwrap_or_else(|| {
            let host = whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_string());
            format!("{}@{}", whoami::username(), host)
        });
        git.init_config(opts, &name, &email)?;
        debug!(root = %git.root.display(), "initialized git repository");
        Ok(git)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn command(&self, opts: &Options, args: &[&str]) -> Result<Command> {
        let binary = self
            .binary
            .as_ref()
            .ok_or_else(|| RcsError::Unavailable("git not found on PATH".to_string()))?;

        let mut cmd = Command::new(binary);
        cmd.arg("-C")
            .arg(&self.root)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(name) = &opts.username {
            cmd.env("GIT_AUTHOR_NAME", name).env("GIT_COMMITTER_NAME", name);
        }
        if let Some(email) = &opts.email {
            cmd.env("GIT_AUTHOR_EMAIL", email)
                .env("GIT_COMMITTER_EMAIL", email);
        }
        if let Some(ts) = opts.commit_timestamp {
            let date = ts.to_rfc3339();
            cmd.env("GIT_AUTHOR_DATE", &date)
                .env("GIT_COMMITTER_DATE", &date);
        }
        Ok(cmd)
    }

    fn output(&self, opts: &Options, args: &[&str]) -> Result<Output> {
        trace!(args = ?args, "running git");
        Ok(self.command(opts, args)?.output()?)
    }

    fn run(&self, opts: &Options, args: &[&str]) -> Result<Vec<u8>> {
        let output = self.output(opts, args)?;
        if !output.status.success() {
            return Err(RcsError::Command {
                command: format!("git {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }
        Ok(output.stdout)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if !self.is_initialized() {
            return Err(RcsError::NotInitialized.into());
        }
        Ok(())
    }

    fn current_branch(&self, opts: &Options) -> Result<String> {
        let out = self.run(opts, &["rev-parse", "--abbrev-ref", "HEAD"])?;
        Ok(String::from_utf8_lossy(&out).trim().to_string())
    }

    fn has_remote(&self, opts: &Options, remote: &str) -> Result<bool> {
        let key = format!("remote.{remote}.url");
        Ok(self
            .output(opts, &["config", "--get", key.as_str()])?
            .status
            .success())
    }

    fn sync(&self, opts: &Options, verb: &str, remote: Option<&str>, branch: Option<&str>) -> Result<()> {
        self.ensure_initialized()?;
        if opts.no_network {
            debug!(verb, "network disabled, skipping");
            return Ok(());
        }
        let remote = remote.unwrap_or("origin");
        if !self.has_remote(opts, remote)? {
            return Err(RcsError::NoRemote(remote.to_string()).into());
        }
        let branch = match branch {
            Some(b) => b.to_string(),
            None => self.current_branch(opts)?,
        };
        self.run(opts, &[verb, remote, branch.as_str()])?;
        Ok(())
    }
}

impl Rcs for Git {
    fn name(&self) -> &'static str {
        "git"
    }

    fn is_initialized(&self) -> bool {
        self.root.join(".git").exists()
    }

    fn add(&self, opts: &Options, paths: &[&str]) -> Result<()> {
        self.ensure_initialized()?;
        let mut args = vec!["add", "--all", "--force", "--"];
        if paths.is_empty() {
            args.push(".");
        } else {
            args.extend_from_slice(paths);
        }
        self.run(opts, &args)?;
        Ok(())
    }

    fn commit(&self, opts: &Options, message: &str) -> Result<()> {
        self.ensure_initialized()?;
        let staged = self.output(opts, &["diff", "--cached", "--quiet"])?;
        if staged.status.success() {
            return Err(RcsError::NothingToCommit.into());
        }
        self.run(opts, &["commit", "--quiet", "--no-verify", "-m", message])?;
        debug!(message, "committed");
        Ok(())
    }

    fn push(&self, opts: &Options, remote: Option<&str>, branch: Option<&str>) -> Result<()> {
        self.sync(opts, "push", remote, branch)
    }

    fn pull(&self, opts: &Options, remote: Option<&str>, branch: Option<&str>) -> Result<()> {
        self.sync(opts, "pull", remote, branch)
    }

    fn add_remote(&self, opts: &Options, name: &str, url: &str) -> Result<()> {
        self.ensure_initialized()?;
        self.run(opts, &["remote", "add", name, url])?;
        Ok(())
    }

    fn remove_remote(&self, opts: &Options, name: &str) -> Result<()> {
        self.ensure_initialized()?;
        if !self.has_remote(opts, name)? {
            return Err(RcsError::NoRemote(name.to_string()).into());
        }
        self.run(opts, &["remote", "remove", name])?;
        Ok(())
    }

    fn status(&self, opts: &Options) -> Result<Vec<u8>> {
        self.ensure_initialized()?;
        self.run(opts, &["status", "--porcelain"])
    }

    fn revisions(&self, opts: &Options, name: &str) -> Result<Vec<Revision>> {
        self.ensure_initialized()?;
        let out = self.run(opts, &["log", LOG_FORMAT, "--", name])?;
        Ok(parse_log(&String::from_utf8_lossy(&out)))
    }

    fn get_revision(&self, opts: &Options, name: &str, revision: &str) -> Result<Vec<u8>> {
        self.ensure_initialized()?;
        let spec = format!("{}:{}", revision.trim(), name);
        self.run(opts, &["show", spec.as_str()])
    }

    fn compact(&self, opts: &Options) -> Result<()> {
        self.ensure_initialized()?;
        self.run(opts, &["gc", "--aggressive", "--quiet"])?;
        Ok(())
    }

    fn init_config(&self, opts: &Options, name: &str, email: &str) -> Result<()> {
        self.ensure_initialized()?;
        self.run(opts, &["config", "--local", "user.name", name])?;
        self.run(opts, &["config", "--local", "user.email", email])?;
        self.run(opts, &["config", "--local", "commit.gpgsign", "false"])?;
        Ok(())
    }
}

fn parse_log(log: &str) -> Vec<Revision> {
    log.split(RECORD_SEP)
        .filter_map(|record| {
            let record = record.trim_start_matches('\n');
            if record.trim().is_empty() {
                return None;
            }
            let fields: Vec<&str> = record.splitn(6, FIELD_SEP).collect();
            if fields.len() < 5 {
                return None;
            }
            let secs = fields[3].trim().parse::<i64>().ok()?;
            let date: DateTime<Utc> = DateTime::from_timestamp(secs, 0)?;
            Some(Revision {
                hash: fields[0].to_string(),
                author: fields[1].to_string(),
                email: fields[2].to_string(),
                date,
                subject: fields[4].to_string(),
                body: fields.get(5).map(|b| b.trim().to_string()).unwrap_or_default(),
            })
        })
        .collect()
}
