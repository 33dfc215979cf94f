//! GPG backend.
//!
//! Drives the `gpg` CLI in batch mode. Recipients are primary key
//! fingerprints; the keyring is whatever `--homedir` (or `GNUPGHOME`)
//! points at.
//!
//! ## Requirements
//!
//! - `gpg2` or `gpg` must be on `PATH`
//! - recipient public keys must be in the keyring
//! - a private key must be available for decryption

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::thread;

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, trace};
use zeroize::Zeroizing;

use super::{Crypto, Keyring};
use crate::core::context::Options;
use crate::error::{CryptoError, Result};

/// A key as reported by `--with-colons` listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpgKey {
    pub fingerprint: String,
    pub key_id: String,
    pub uids: Vec<String>,
    pub subkey_ids: Vec<String>,
}

impl GpgKey {
    fn matches(&self, needle: &str) -> bool {
        let bare = needle
            .trim()
            .trim_start_matches("0x")
            .trim_start_matches("0X")
            .to_ascii_uppercase();
        if bare.is_empty() {
            return false;
        }
        if bare.len() >= 8 && bare.chars().all(|c| c.is_ascii_hexdigit()) {
            if self.fingerprint.ends_with(&bare)
                || self.subkey_ids.iter().any(|s| s.ends_with(&bare))
            {
                return true;
            }
        }
        let needle = needle.trim().trim_start_matches('<').trim_end_matches('>');
        self.uids.iter().any(|uid| {
            uid == needle
                || uid
                    .rsplit_once('<')
                    .and_then(|(_, rest)| rest.strip_suffix('>'))
                    .is_some_and(|email| email.eq_ignore_ascii_case(needle))
        })
    }
}

/// Parse `gpg --with-colons --fingerprint` output.
///
/// The first `fpr` after a `pub`/`sec` record is the primary fingerprint;
/// later `fpr` records belong to subkeys.
pub fn parse_colons(out: &str) -> Vec<GpgKey> {
    let mut keys: Vec<GpgKey> = Vec::new();
    let mut in_subkey = false;
    for line in out.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        match fields.first().copied() {
            Some("pub") | Some("sec") => {
                keys.push(GpgKey {
                    key_id: fields.get(4).copied().unwrap_or_default().to_string(),
                    ..GpgKey::default()
                });
                in_subkey = false;
            }
            Some("sub") | Some("ssb") => {
                in_subkey = true;
                if let Some(key) = keys.last_mut() {
                    if let Some(id) = fields.get(4).filter(|s| !s.is_empty()) {
                        key.subkey_ids.push(id.to_string());
                    }
                }
            }
            Some("fpr") => {
                let fpr = fields.get(9).copied().unwrap_or_default();
                if let Some(key) = keys.last_mut() {
                    if in_subkey {
                        key.subkey_ids.push(fpr.to_string());
                    } else if key.fingerprint.is_empty() {
                        key.fingerprint = fpr.to_string();
                    }
                }
            }
            Some("uid") => {
                if let Some(key) = keys.last_mut() {
                    if let Some(uid) = fields.get(9).filter(|s| !s.is_empty()) {
                        key.uids.push(unescape(uid));
                    }
                }
            }
            _ => {}
        }
    }
    keys.retain(|k| !k.fingerprint.is_empty());
    keys
}

/// Undo gpg's `\xNN` escaping in colon listings.
fn unescape(s: &str) -> String {
    let mut out = Vec::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && bytes[i + 1] == b'x' {
            let hex = std::str::from_utf8(&bytes[i + 2..i + 4]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Key ids named by `[GNUPG:] ENC_TO` status lines.
pub fn parse_enc_to(status: &str) -> Vec<String> {
    status
        .lines()
        .filter_map(|l| l.strip_prefix("[GNUPG:] ENC_TO "))
        .filter_map(|rest| rest.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// GnuPG CLI backend.
#[derive(Debug, Default)]
pub struct Gpg {
    homedir: Option<PathBuf>,
    binary: OnceLock<Option<PathBuf>>,
}

impl Gpg {
    pub fn new(homedir: Option<&Path>) -> Self {
        Self {
            homedir: homedir.map(Path::to_path_buf),
            binary: OnceLock::new(),
        }
    }

    /// Whether a gpg binary can be found.
    pub fn available() -> bool {
        which::which("gpg2").is_ok() || which::which("gpg").is_ok()
    }

    fn binary(&self) -> Result<&Path> {
        self.binary
            .get_or_init(|| which::which("gpg2").or_else(|_| which::which("gpg")).ok())
            .as_deref()
            .ok_or_else(|| {
                CryptoError::Tool {
                    tool: "gpg",
                    message: "gpg not found on PATH".to_string(),
                }
                .into()
            })
    }

    /// Run gpg with `args`, feeding `input` on stdin.
    fn run(&self, args: &[&str], input: &[u8]) -> Result<std::process::Output> {
        let mut cmd = Command::new(self.binary()?);
        cmd.args(["--batch", "--no-tty"]);
        if let Some(home) = &self.homedir {
            cmd.arg("--homedir").arg(home);
        }
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        trace!(?args, "running gpg");

        let mut child = cmd.spawn().map_err(|e| CryptoError::Tool {
            tool: "gpg",
            message: format!("failed to spawn: {e}"),
        })?;
        let stdin = child.stdin.take();
        let output = thread::scope(|s| {
            if let Some(mut stdin) = stdin {
                s.spawn(move || {
                    // A gpg that exits early closes the pipe; the exit status reports it.
                    let _ = stdin.write_all(input);
                });
            }
            child.wait_with_output()
        })
        .map_err(|e| CryptoError::Tool {
            tool: "gpg",
            message: e.to_string(),
        })?;
        Ok(output)
    }

    fn run_ok(&self, args: &[&str], input: &[u8]) -> Result<Vec<u8>> {
        let output = self.run(args, input)?;
        if !output.status.success() {
            return Err(CryptoError::Tool {
                tool: "gpg",
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }
        Ok(output.stdout)
    }

    fn list(&self, secret: bool) -> Result<Vec<GpgKey>> {
        let flag = if secret {
            "--list-secret-keys"
        } else {
            "--list-keys"
        };
        let out = self.run(&["--with-colons", "--fingerprint", flag], b"")?;
        // gpg exits non-zero on an empty keyring on some versions.
        Ok(parse_colons(&String::from_utf8_lossy(&out.stdout)))
    }

    fn find(&self, secret: bool, needles: &[String]) -> Result<Vec<String>> {
        let keys = self.list(secret)?;
        let mut found: Vec<String> = Vec::new();
        for needle in needles {
            if let Some(key) = keys.iter().find(|k| k.matches(needle)) {
                if !found.contains(&key.fingerprint) {
                    found.push(key.fingerprint.clone());
                }
            }
        }
        Ok(found)
    }
}

impl Keyring for Gpg {
    fn import_public_key(&self, _opts: &Options, buf: &[u8]) -> Result<()> {
        self.run_ok(&["--import"], buf)?;
        debug!("imported gpg public key");
        Ok(())
    }

    fn export_public_key(&self, _opts: &Options, id: &str) -> Result<Vec<u8>> {
        let out = self.run_ok(&["--armor", "--export", id], b"")?;
        if out.is_empty() {
            return Err(CryptoError::KeyNotFound(id.to_string()).into());
        }
        Ok(out)
    }

    fn list_recipients(&self, _opts: &Options) -> Result<Vec<String>> {
        Ok(self.list(false)?.into_iter().map(|k| k.fingerprint).collect())
    }

    fn list_identities(&self, _opts: &Options) -> Result<Vec<String>> {
        Ok(self.list(true)?.into_iter().map(|k| k.fingerprint).collect())
    }

    fn find_recipients(&self, _opts: &Options, needles: &[String]) -> Result<Vec<String>> {
        self.find(false, needles)
    }

    fn find_identities(&self, _opts: &Options, needles: &[String]) -> Result<Vec<String>> {
        self.find(true, needles)
    }

    fn fingerprint(&self, _opts: &Options, id: &str) -> String {
        match self.list(false) {
            Ok(keys) => keys
                .into_iter()
                .find(|k| k.matches(id))
                .map(|k| k.fingerprint)
                .unwrap_or_else(|| id.to_string()),
            Err(_) => id.to_string(),
        }
    }

    fn format_key(&self, _opts: &Options, id: &str) -> String {
        let keys = self.list(false).unwrap_or_default();
        match keys.iter().find(|k| k.matches(id)) {
            Some(key) => format!(
                "0x{} - {}",
                key.fingerprint,
                key.uids.first().map(String::as_str).unwrap_or_default()
            ),
            None => id.to_string(),
        }
    }

    fn read_names_from_key(&self, _opts: &Options, buf: &[u8]) -> Result<Vec<String>> {
        let out = self.run_ok(
            &[
                "--with-colons",
                "--import-options",
                "show-only",
                "--import",
            ],
            buf,
        )?;
        Ok(parse_colons(&String::from_utf8_lossy(&out))
            .into_iter()
            .flat_map(|k| k.uids)
            .collect())
    }

    fn create_private_key(
        &self,
        _opts: &Options,
        name: &str,
        email: &str,
        passphrase: &SecretString,
    ) -> Result<String> {
        let uid = format!("{name} <{email}>");
        let input = Zeroizing::new(format!("{}\n", passphrase.expose_secret()));
        self.run_ok(
            &[
                "--pinentry-mode",
                "loopback",
                "--passphrase-fd",
                "0",
                "--quick-generate-key",
                &uid,
                "default",
                "default",
                "never",
            ],
            input.as_bytes(),
        )?;
        let keys = self.find(true, &[email.to_string()])?;
        keys.into_iter()
            .next()
            .ok_or_else(|| CryptoError::KeyNotFound(uid).into())
    }
}

impl Crypto for Gpg {
    fn name(&self) -> &'static str {
        "gpg"
    }

    fn ext(&self) -> &'static str {
        "gpg"
    }

    fn id_file(&self) -> &'static str {
        ".gpg-id"
    }

    /// The gpg agent serializes access to the keyring anyway.
    fn max_concurrency(&self) -> usize {
        1
    }

    fn encrypt(&self, _opts: &Options, plaintext: &[u8], recipients: &[String]) -> Result<Vec<u8>> {
        if recipients.is_empty() {
            return Err(CryptoError::Encrypt("no recipients provided".to_string()).into());
        }
        trace!(
            recipients = recipients.len(),
            plaintext_len = plaintext.len(),
            "encrypting with gpg"
        );
        let mut args = vec![
            "--encrypt",
            "--trust-model",
            "always",
            "--yes",
            "--output",
            "-",
        ];
        for recipient in recipients {
            args.extend(["--recipient", recipient.as_str()]);
        }
        let output = self.run(&args, plaintext)?;
        if !output.status.success() {
            return Err(CryptoError::Encrypt(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            )
            .into());
        }
        Ok(output.stdout)
    }

    fn decrypt(&self, _opts: &Options, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        trace!(ciphertext_len = ciphertext.len(), "decrypting with gpg");
        let output = self.run(&["--decrypt", "--quiet", "--yes"], ciphertext)?;
        if !output.status.success() {
            debug!(
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "gpg decrypt failed"
            );
            return Err(CryptoError::Decrypt.into());
        }
        Ok(Zeroizing::new(output.stdout))
    }

    fn recipient_ids(&self, _opts: &Options, ciphertext: &[u8]) -> Result<Vec<String>> {
        let output = self.run(
            &["--list-only", "--status-fd", "1", "--decrypt"],
            ciphertext,
        )?;
        let ids = parse_enc_to(&String::from_utf8_lossy(&output.stdout));
        let keys = self.list(false)?;
        let mut fps: Vec<String> = ids
            .iter()
            .map(|id| {
                keys.iter()
                    .find(|k| k.matches(id))
                    .map(|k| k.fingerprint.clone())
                    .unwrap_or_else(|| id.clone())
            })
            .collect();
        fps.sort();
        fps.dedup();
        Ok(fps)
    }
}
