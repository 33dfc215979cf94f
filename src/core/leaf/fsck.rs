//! Store consistency checks.
//!
//! Runs the storage check, compacts the versioning history, then compares
//! every secret's embedded recipients with the recipients it should have.
//! Diverging secrets are re-encrypted unless `fsck_check` asks for a dry
//! run; `fsck_force` re-encrypts everything.

use tracing::{debug, info, trace, warn};

use super::{is_unsupported, Leaf};
use crate::core::context::Options;
use crate::core::domain::{Finding, FsckReport, Severity};
use crate::core::rcs;
use crate::error::Result;

const FIX_MESSAGE: &str = "fsck fix recipients";

fn record(opts: &Options, report: &mut FsckReport, finding: Finding) {
    match finding.severity {
        Severity::Info => info!(path = %finding.path, "{}", finding.message),
        Severity::Warning | Severity::Error => {
            warn!(path = %finding.path, severity = ?finding.severity, "{}", finding.message)
        }
    }
    opts.report(&finding);
    report.findings.push(finding);
}

impl Leaf {
    /// Check the store, or the secrets under `prefix`, and repair
    /// recipient divergence.
    ///
    /// # Errors
    ///
    /// Fails only when the store can not be walked at all or the check is
    /// cancelled; per-secret problems end up in the report.
    pub fn fsck(&self, opts: &Options, prefix: &str) -> Result<FsckReport> {
        let mut report = FsckReport::default();

        debug!(alias = %self.alias, "checking storage");
        for finding in self.storage.fsck(opts)? {
            record(opts, &mut report, finding);
        }

        debug!(alias = %self.alias, "compacting history");
        if let Err(e) = rcs::soften(self.storage.rcs().compact(opts), "compact") {
            record(opts, &mut report, Finding::warning("", format!("compaction failed: {e}")));
        }

        self.check_recipient_keys(opts, &mut report);

        let entry_opts = Options {
            queue: None,
            ..opts.with_no_network(true)
        };
        for name in self.list(opts, prefix)? {
            opts.check_cancelled()?;
            opts.progress();
            self.fsck_entry(&entry_opts, &name, &mut report)?;
        }

        if let Err(e) = self.import_missing_public_keys(opts) {
            let finding = Finding::warning("", format!("failed to import public keys: {e}"));
            record(opts, &mut report, finding);
        }

        if !opts.fsck_check && !report.fixed.is_empty() {
            let paths: Vec<String> = report.fixed.iter().map(|n| self.secret_path(n)).collect();
            self.commit(opts, &paths, FIX_MESSAGE.to_string())?;
        }
        info!(
            alias = %self.alias,
            findings = report.findings.len(),
            fixed = report.fixed.len(),
            "fsck finished"
        );
        Ok(report)
    }

    /// Warn about root recipients without a usable public key.
    fn check_recipient_keys(&self, opts: &Options, report: &mut FsckReport) {
        let id_file = self.crypto.id_file();
        for id in self.recipients(opts) {
            match self.crypto.find_recipients(opts, &[id.clone()]) {
                Ok(found) if !found.is_empty() => {}
                Ok(_) => record(
                    opts,
                    report,
                    Finding::warning(id_file, format!("no usable public key for {id}")),
                ),
                Err(e) => record(
                    opts,
                    report,
                    Finding::warning(id_file, format!("key lookup for {id} failed: {e}")),
                ),
            }
        }
    }

    fn fsck_entry(&self, opts: &Options, name: &str, report: &mut FsckReport) -> Result<()> {
        let want = self.fingerprints(opts, self.useable_keys(opts, name)?.iter());
        let mut fix = opts.fsck_force;

        match self.recipient_ids(opts, name) {
            Ok(have) => {
                let missing: Vec<&str> = want
                    .iter()
                    .filter(|w| !have.contains(w))
                    .map(String::as_str)
                    .collect();
                let extra: Vec<&str> = have
                    .iter()
                    .filter(|h| !want.contains(h))
                    .map(String::as_str)
                    .collect();
                if !missing.is_empty() {
                    let msg = format!("missing recipients: {}", missing.join(", "));
                    record(opts, report, Finding::warning(name, msg));
                    fix = true;
                }
                if !extra.is_empty() {
                    let msg = format!("extra recipients: {}", extra.join(", "));
                    record(opts, report, Finding::warning(name, msg));
                    fix = true;
                }
            }
            Err(e) if is_unsupported(&e) => {
                trace!(name, "backend can not list recipients");
            }
            Err(e) => {
                let msg = format!("failed to read recipients: {e}");
                record(opts, report, Finding::error(name, msg));
                return Ok(());
            }
        }

        if opts.fsck_decrypt && !fix {
            if let Err(e) = self.get(opts, name) {
                record(opts, report, Finding::error(name, format!("failed to decrypt: {e}")));
                return Ok(());
            }
        }
        if !fix {
            return Ok(());
        }
        if opts.fsck_check {
            record(opts, report, Finding::info(name, "would re-encrypt"));
            return Ok(());
        }

        match self.reencrypt_one(&opts.with_git_commit(false).with_no_git_ops(true), name) {
            Ok(()) => {
                record(opts, report, Finding::info(name, "re-encrypted"));
                report.fixed.push(name.to_string());
            }
            Err(e) => {
                record(opts, report, Finding::error(name, format!("failed to re-encrypt: {e}")));
            }
        }
        Ok(())
    }
}
