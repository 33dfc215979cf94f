//! Options carrier threaded through every store operation.
//!
//! `Options` is cheap to clone and never mutated in place: the `with_*`
//! builders return a modified copy scoped to the call that needs it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::SecretString;

use crate::core::constants::DEFAULT_CLIP_TIMEOUT;
use crate::core::domain::Finding;
use crate::core::queue::Queue;

/// Called once per processed entry in bulk operations.
pub type ProgressFn = Arc<dyn Fn() + Send + Sync>;
/// Asked for a passphrase; arguments are key id and reason.
pub type PasswordFn = Arc<dyn Fn(&str, &str) -> Option<SecretString> + Send + Sync>;
/// Asked to confirm a prompt.
pub type ConfirmFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;
/// Asked whether to import a public key; arguments are key id and names.
pub type ImportFn = Arc<dyn Fn(&str, &[String]) -> bool + Send + Sync>;
/// Receives every fsck finding as it is produced.
pub type FsckFn = Arc<dyn Fn(&Finding) + Send + Sync>;

/// Cooperative cancellation flag shared between a caller and workers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Options recognized by store operations.
///
/// Defaults: commits on, exported keys on, one worker, 45 s clip timeout,
/// everything else off.
#[derive(Clone)]
pub struct Options {
    pub debug: bool,
    pub color: bool,
    pub terminal: bool,
    pub interactive: bool,
    pub stdin: bool,
    /// Skip push and pull.
    pub no_network: bool,
    pub no_confirm: bool,
    pub no_pager: bool,
    /// Answer yes to every confirmation.
    pub always_yes: bool,
    /// Export recipient public keys into `.public-keys/`.
    pub export_keys: bool,
    /// Fail when the recipient list hash does not match the recorded one.
    pub check_recipients: bool,
    /// Report fsck findings without repairing secrets.
    pub fsck_check: bool,
    /// Re-encrypt every secret during fsck.
    pub fsck_force: bool,
    /// Decrypt every secret during fsck.
    pub fsck_decrypt: bool,
    /// Commit after mutating operations.
    pub git_commit: bool,
    /// Skip staging, commit and push entirely for this call.
    pub no_git_ops: bool,
    /// Import missing public keys without asking.
    pub auto_import: bool,
    pub commit_message: String,
    pub commit_timestamp: Option<DateTime<Utc>>,
    /// Worker pool size for bulk re-encryption.
    pub concurrency: usize,
    pub clip_timeout: Duration,
    pub username: Option<String>,
    pub email: Option<String>,
    pub progress_cb: Option<ProgressFn>,
    pub password_cb: Option<PasswordFn>,
    pub confirm_cb: Option<ConfirmFn>,
    pub import_cb: Option<ImportFn>,
    pub fsck_cb: Option<FsckFn>,
    pub cancel: CancelToken,
    /// Deferred versioning queue; tasks run inline when absent.
    pub queue: Option<Arc<Queue>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            debug: false,
            color: false,
            terminal: false,
            interactive: false,
            stdin: false,
            no_network: false,
            no_confirm: false,
            no_pager: false,
            always_yes: false,
            export_keys: true,
            check_recipients: false,
            fsck_check: false,
            fsck_force: false,
            fsck_decrypt: false,
            git_commit: true,
            no_git_ops: false,
            auto_import: true,
            commit_message: String::new(),
            commit_timestamp: None,
            concurrency: 1,
            clip_timeout: Duration::from_secs(DEFAULT_CLIP_TIMEOUT),
            username: None,
            email: None,
            progress_cb: None,
            password_cb: None,
            confirm_cb: None,
            import_cb: None,
            fsck_cb: None,
            cancel: CancelToken::new(),
            queue: None,
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("no_network", &self.no_network)
            .field("export_keys", &self.export_keys)
            .field("check_recipients", &self.check_recipients)
            .field("fsck_check", &self.fsck_check)
            .field("fsck_force", &self.fsck_force)
            .field("fsck_decrypt", &self.fsck_decrypt)
            .field("git_commit", &self.git_commit)
            .field("no_git_ops", &self.no_git_ops)
            .field("concurrency", &self.concurrency)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("queue", &self.queue.is_some())
            .finish_non_exhaustive()
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_git_commit(&self, on: bool) -> Self {
        Self {
            git_commit: on,
            ..self.clone()
        }
    }

    pub fn with_no_git_ops(&self, on: bool) -> Self {
        Self {
            no_git_ops: on,
            ..self.clone()
        }
    }

    pub fn with_commit_message(&self, msg: impl Into<String>) -> Self {
        Self {
            commit_message: msg.into(),
            ..self.clone()
        }
    }

    pub fn with_concurrency(&self, n: usize) -> Self {
        Self {
            concurrency: n.max(1),
            ..self.clone()
        }
    }

    pub fn with_no_network(&self, on: bool) -> Self {
        Self {
            no_network: on,
            ..self.clone()
        }
    }

    pub fn with_export_keys(&self, on: bool) -> Self {
        Self {
            export_keys: on,
            ..self.clone()
        }
    }

    pub fn with_fsck(&self, check: bool, force: bool, decrypt: bool) -> Self {
        Self {
            fsck_check: check,
            fsck_force: force,
            fsck_decrypt: decrypt,
            ..self.clone()
        }
    }

    pub fn with_queue(&self, queue: Arc<Queue>) -> Self {
        Self {
            queue: Some(queue),
            ..self.clone()
        }
    }

    pub fn with_cancel(&self, token: CancelToken) -> Self {
        Self {
            cancel: token,
            ..self.clone()
        }
    }

    pub fn with_import_cb(&self, cb: ImportFn) -> Self {
        Self {
            import_cb: Some(cb),
            ..self.clone()
        }
    }

    pub fn with_fsck_cb(&self, cb: FsckFn) -> Self {
        Self {
            fsck_cb: Some(cb),
            ..self.clone()
        }
    }

    pub fn with_progress_cb(&self, cb: ProgressFn) -> Self {
        Self {
            progress_cb: Some(cb),
            ..self.clone()
        }
    }

    pub fn with_author(&self, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            username: Some(name.into()),
            email: Some(email.into()),
            ..self.clone()
        }
    }

    /// Ask the confirm callback, honoring `always_yes` and `no_confirm`.
    pub fn confirm(&self, prompt: &str) -> bool {
        if self.always_yes || self.no_confirm {
            return true;
        }
        match &self.confirm_cb {
            Some(cb) => cb(prompt),
            None => false,
        }
    }

    pub(crate) fn progress(&self) {
        if let Some(cb) = &self.progress_cb {
            cb();
        }
    }

    pub(crate) fn report(&self, finding: &Finding) {
        if let Some(cb) = &self.fsck_cb {
            cb(finding);
        }
    }

    /// Fail with `Cancelled` once the token has fired.
    pub fn check_cancelled(&self) -> crate::error::Result<()> {
        if self.cancel.is_cancelled() {
            return Err(crate::error::Error::Cancelled);
        }
        Ok(())
    }
}
