//! Bulk re-encryption.
//!
//! Every secret in scope is decrypted and written again for its current
//! recipients. Work is spread over a fixed pool of scoped threads fed
//! through an unbuffered channel. With more than one worker the versioning
//! index is only touched after every worker has finished; the whole run
//! ends in a single commit.

use std::sync::{mpsc, Mutex};
use std::thread;

use tracing::{debug, info, warn};

use super::Leaf;
use crate::core::context::Options;
use crate::error::{Error, Result, StoreError};

impl Leaf {
    /// Re-encrypt every secret under `prefix` and commit with `message`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` if the cancel token fires before every
    /// entry was dispatched and `StoreError::Reencrypt` naming the entries
    /// that failed. Successful entries are committed either way.
    pub(crate) fn reencrypt(&self, opts: &Options, prefix: &str, message: &str) -> Result<()> {
        let entries = self.list(opts, prefix)?;
        let workers = opts
            .concurrency
            .min(self.crypto.max_concurrency())
            .min(entries.len())
            .max(1);
        let parallel = workers > 1;
        debug!(
            alias = %self.alias,
            entries = entries.len(),
            workers,
            "starting re-encryption"
        );

        let entry_opts = opts.with_git_commit(false).with_no_git_ops(parallel);
        let failed: Mutex<Vec<String>> = Mutex::new(Vec::new());
        let (tx, rx) = mpsc::sync_channel::<String>(0);
        let rx = Mutex::new(rx);
        let mut cancelled = false;

        thread::scope(|scope| {
            for worker in 0..workers {
                let (rx, failed, entry_opts) = (&rx, &failed, &entry_opts);
                scope.spawn(move || loop {
                    let next = rx.lock().unwrap_or_else(|e| e.into_inner()).recv();
                    let Ok(name) = next else { break };
                    if let Err(e) = self.reencrypt_one(entry_opts, &name) {
                        warn!(worker, name = %name, error = %e, "failed to re-encrypt");
                        failed
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .push(name);
                    }
                });
            }

            for name in &entries {
                if opts.cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }
                opts.progress();
                if tx.send(name.clone()).is_err() {
                    break;
                }
            }
            drop(tx);
        });

        if cancelled {
            warn!(alias = %self.alias, "re-encryption cancelled");
            return Err(Error::Cancelled);
        }

        let mut failed = failed.into_inner().unwrap_or_else(|e| e.into_inner());
        failed.sort();
        let done: Vec<String> = entries
            .iter()
            .filter(|name| failed.binary_search(*name).is_err())
            .map(|name| self.secret_path(name))
            .collect();
        if !done.is_empty() {
            self.commit(opts, &done, message.to_string())?;
        }
        info!(
            alias = %self.alias,
            reencrypted = done.len(),
            failed = failed.len(),
            "re-encryption finished"
        );

        if failed.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Reencrypt(failed).into())
        }
    }

    pub(super) fn reencrypt_one(&self, opts: &Options, name: &str) -> Result<()> {
        let secret = self.get(opts, name)?;
        self.set(opts, name, &secret)
    }
}
