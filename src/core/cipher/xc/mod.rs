//! XC: in-tree hybrid encryption backend.
//!
//! A random session key encrypts the plaintext in 16 KiB secretbox chunks;
//! the session key is sealed to every recipient with an X25519 box from the
//! sender's key. Private keys live encrypted in `secring.xc` and are
//! unlocked through the passphrase agent on first use.

use std::collections::HashMap;
use std::fmt;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use secrecy::SecretString;
use tracing::{debug, trace, warn};
use zeroize::Zeroizing;

use super::{Crypto, Keyring};
use crate::core::agent::Agent;
use crate::core::context::Options;
use crate::error::{CryptoError, Error, Result};

pub mod key;
pub mod keyring;
pub mod message;

pub use key::{Identity, KdfParams, PrivateKey, PublicKey, UnlockedKey};
pub use keyring::{Pubring, Secring, PUBRING_FILE, SECRING_FILE};
pub use message::{Message, CHUNK_SIZE};

use message::{ChunkCipher, Header};

/// Attempts before giving up on a passphrase.
pub const MAX_UNLOCK_ATTEMPTS: usize = 3;

const UNLOCK_BACKOFF: Duration = Duration::from_millis(10);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// XC backend with its own key rings.
pub struct Xc {
    dir: Option<PathBuf>,
    pubring: Mutex<Pubring>,
    secring: Mutex<Secring>,
    unlocked: Mutex<HashMap<String, UnlockedKey>>,
    agent: Arc<dyn Agent>,
    kdf: KdfParams,
}

impl fmt::Debug for Xc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Xc")
            .field("dir", &self.dir)
            .field("public_keys", &lock(&self.pubring).len())
            .field("private_keys", &lock(&self.secring).len())
            .finish_non_exhaustive()
    }
}

impl Xc {
    /// Open the key rings stored in `dir`.
    pub fn open(dir: &Path, agent: Arc<dyn Agent>, kdf: KdfParams) -> Result<Self> {
        let pubring = Pubring::load(&dir.join(PUBRING_FILE))?;
        let secring = Secring::load(&dir.join(SECRING_FILE))?;
        debug!(
            dir = %dir.display(),
            public = pubring.len(),
            private = secring.len(),
            "opened xc keyring"
        );
        Ok(Self {
            dir: Some(dir.to_path_buf()),
            pubring: Mutex::new(pubring),
            secring: Mutex::new(secring),
            unlocked: Mutex::new(HashMap::new()),
            agent,
            kdf,
        })
    }

    /// Backend whose rings are never persisted.
    pub fn in_memory(agent: Arc<dyn Agent>, kdf: KdfParams) -> Self {
        Self {
            dir: None,
            pubring: Mutex::new(Pubring::in_memory()),
            secring: Mutex::new(Secring::in_memory()),
            unlocked: Mutex::new(HashMap::new()),
            agent,
            kdf,
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Encrypted-at-rest form of a private key.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::KeyNotFound` if we do not hold `id`.
    pub fn export_private_key(&self, id: &str) -> Result<Vec<u8>> {
        let secring = lock(&self.secring);
        let key = secring
            .find(id)
            .ok_or_else(|| CryptoError::KeyNotFound(id.to_string()))?;
        key.encode()
    }

    /// Add an exported private key (and its public half).
    pub fn import_private_key(&self, buf: &[u8]) -> Result<String> {
        let key = PrivateKey::decode(buf)?;
        let fp = key.fingerprint().to_string();
        {
            let mut pubring = lock(&self.pubring);
            pubring.insert(key.public().clone());
            pubring.save()?;
        }
        {
            let mut secring = lock(&self.secring);
            secring.insert(key);
            secring.save()?;
        }
        lock(&self.unlocked).remove(&fp);
        debug!(fingerprint = %fp, "imported xc private key");
        Ok(fp)
    }

    /// Drop a key from both rings.
    pub fn remove_key(&self, id: &str) -> Result<()> {
        let fp = self.fingerprint(&Options::default(), id);
        let removed_public = {
            let mut pubring = lock(&self.pubring);
            let removed = pubring.remove(&fp).is_some();
            pubring.save()?;
            removed
        };
        let removed_private = {
            let mut secring = lock(&self.secring);
            let removed = secring.remove(&fp).is_some();
            secring.save()?;
            removed
        };
        lock(&self.unlocked).remove(&fp);
        if !removed_public && !removed_private {
            return Err(CryptoError::KeyNotFound(id.to_string()).into());
        }
        Ok(())
    }

    /// Forget every unlocked private scalar.
    pub fn wipe(&self) {
        lock(&self.unlocked).clear();
    }

    fn passphrase(&self, opts: &Options, fp: &str, reason: &str) -> Result<SecretString> {
        if let Some(cb) = &opts.password_cb {
            return cb(fp, reason).ok_or_else(|| CryptoError::Locked(fp.to_string()).into());
        }
        self.agent.passphrase(fp, reason)
    }

    /// Unlocked scalar for `fp`, prompting if needed. No lock is held
    /// while the agent prompts.
    fn unlock(&self, opts: &Options, fp: &str) -> Result<UnlockedKey> {
        if let Some(key) = lock(&self.unlocked).get(fp) {
            return Ok(key.clone());
        }
        let sealed = lock(&self.secring)
            .get(fp)
            .cloned()
            .ok_or_else(|| CryptoError::KeyNotFound(fp.to_string()))?;
        let reason = format!("Unlock xc key {} ({})", fp, sealed.public().identity());

        for attempt in 1..=MAX_UNLOCK_ATTEMPTS {
            let pass = self.passphrase(opts, fp, &reason)?;
            match sealed.unlock(&pass, &self.kdf) {
                Ok(key) => {
                    trace!(fingerprint = fp, attempt, "unlocked xc key");
                    lock(&self.unlocked).insert(fp.to_string(), key.clone());
                    return Ok(key);
                }
                Err(Error::Crypto(CryptoError::Locked(_))) => {
                    warn!(fingerprint = fp, attempt, "wrong passphrase");
                    self.agent.remove(fp);
                    thread::sleep(UNLOCK_BACKOFF);
                }
                Err(e) => return Err(e),
            }
        }
        Err(CryptoError::Locked(fp.to_string()).into())
    }

    /// First identity we hold among `recipients`, else our first identity.
    fn sender(&self, recipients: &[String]) -> Result<String> {
        let secring = lock(&self.secring);
        recipients
            .iter()
            .find(|fp| secring.contains(fp))
            .cloned()
            .or_else(|| secring.fingerprints().into_iter().next())
            .ok_or_else(|| CryptoError::NoIdentity.into())
    }

    fn recipient_keys(&self, recipients: &[String]) -> Result<Vec<PublicKey>> {
        if recipients.is_empty() {
            return Err(CryptoError::Encrypt("no recipients".into()).into());
        }
        let pubring = lock(&self.pubring);
        let mut keys: Vec<PublicKey> = Vec::with_capacity(recipients.len());
        for id in recipients {
            let key = pubring
                .find(id)
                .ok_or_else(|| CryptoError::Encrypt(format!("recipient {id} not found")))?;
            if !keys.iter().any(|k| k.fingerprint() == key.fingerprint()) {
                keys.push(key.clone());
            }
        }
        Ok(keys)
    }

    /// Seal a fresh session key to every recipient.
    fn seal_header(&self, opts: &Options, recipients: &[String]) -> Result<(Header, ChunkCipher)> {
        let keys = self.recipient_keys(recipients)?;
        let fps: Vec<String> = keys.iter().map(|k| k.fingerprint().to_string()).collect();
        let sender_fp = self.sender(&fps)?;
        let sender = self.unlock(opts, &sender_fp)?;

        let session = message::session_key();
        let mut header = Header {
            sender: sender_fp,
            recipients: Default::default(),
        };
        for key in &keys {
            let sealed = message::seal_session_key(&sender, &key.box_key(), &session)?;
            header.recipients.insert(key.fingerprint().to_string(), sealed);
        }
        Ok((header, ChunkCipher::new(&session)?))
    }

    /// Recover the session key from a header.
    fn open_header(&self, opts: &Options, header: &Header) -> Result<ChunkCipher> {
        let fp = {
            let secring = lock(&self.secring);
            header
                .recipients
                .keys()
                .find(|fp| secring.contains(fp))
                .cloned()
                .ok_or(CryptoError::NoIdentity)?
        };
        let key = self.unlock(opts, &fp)?;

        let sender = {
            let pubring = lock(&self.pubring);
            match pubring.get(&header.sender) {
                Some(k) => k.box_key(),
                None => {
                    let secring = lock(&self.secring);
                    match secring.get(&header.sender) {
                        Some(k) => k.public().box_key(),
                        None => {
                            debug!(sender = %header.sender, "unknown sender");
                            return Err(CryptoError::Decrypt.into());
                        }
                    }
                }
            }
        };
        let sealed = header.recipients.get(&fp).ok_or(CryptoError::Decrypt)?;
        let session = message::open_session_key(&key, &sender, sealed)?;
        ChunkCipher::new(&session)
    }

    /// Encrypt a stream chunk by chunk. Stream output is never compressed.
    pub fn encrypt_stream<R: Read, W: Write>(
        &self,
        opts: &Options,
        mut reader: R,
        mut writer: W,
        recipients: &[String],
    ) -> Result<()> {
        let (header, cipher) = self.seal_header(opts, recipients)?;
        message::write_header(&mut writer, &header, false)?;
        let mut buf = Zeroizing::new(vec![0u8; CHUNK_SIZE]);
        let mut index = 0u64;
        loop {
            opts.check_cancelled()?;
            let n = read_full(&mut reader, &mut buf)?;
            if n == 0 {
                break;
            }
            let body = cipher.seal(index, &buf[..n])?;
            message::write_chunk(&mut writer, &body)?;
            index += 1;
            if n < CHUNK_SIZE {
                break;
            }
        }
        writer.flush()?;
        trace!(chunks = index, "encrypted xc stream");
        Ok(())
    }

    /// Decrypt a stream chunk by chunk.
    ///
    /// Plaintext of verified chunks is written as it is produced; a later
    /// failure still returns `CryptoError::Decrypt`.
    pub fn decrypt_stream<R: Read, W: Write>(
        &self,
        opts: &Options,
        mut reader: R,
        writer: W,
    ) -> Result<()> {
        let mut prefix = [0u8; 4];
        let n = read_full(&mut reader, &mut prefix)?;
        if n == 4 && prefix == [1, 0, 0, 0] {
            let mut buf = prefix.to_vec();
            reader.read_to_end(&mut buf)?;
            let plaintext = self.decrypt(opts, &buf)?;
            let mut writer = writer;
            writer.write_all(&plaintext)?;
            return Ok(writer.flush()?);
        }

        let mut reader = Cursor::new(&prefix[..n]).chain(reader);
        let (header, compressed) = message::read_header(&mut reader).map_err(opaque)?;
        let cipher = self.open_header(opts, &header)?;

        if compressed {
            let mut sink = zstd::stream::write::Decoder::new(writer)?;
            open_chunks(opts, &mut reader, &cipher, &mut sink)
        } else {
            let mut sink = writer;
            open_chunks(opts, &mut reader, &cipher, &mut sink)
        }
    }
}

fn open_chunks<R: Read, W: Write>(
    opts: &Options,
    reader: &mut R,
    cipher: &ChunkCipher,
    sink: &mut W,
) -> Result<()> {
    let mut index = 0u64;
    while let Some(body) = message::read_chunk(reader).map_err(opaque)? {
        opts.check_cancelled()?;
        let plain = cipher.open(index, &body)?;
        sink.write_all(&plain).map_err(|_| CryptoError::Decrypt)?;
        index += 1;
    }
    sink.flush().map_err(|_| CryptoError::Decrypt)?;
    Ok(())
}

/// Malformed input reads as a decryption failure.
fn opaque(e: Error) -> Error {
    debug!(error = %e, "malformed xc message");
    CryptoError::Decrypt.into()
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

impl Keyring for Xc {
    fn import_public_key(&self, _opts: &Options, buf: &[u8]) -> Result<()> {
        let key = PublicKey::decode(buf)?;
        debug!(fingerprint = key.fingerprint(), "importing xc public key");
        let mut pubring = lock(&self.pubring);
        pubring.insert(key);
        pubring.save()
    }

    fn export_public_key(&self, opts: &Options, id: &str) -> Result<Vec<u8>> {
        let fp = self.fingerprint(opts, id);
        if let Some(key) = lock(&self.pubring).get(&fp) {
            return key.encode();
        }
        match lock(&self.secring).get(&fp) {
            Some(key) => key.public().encode(),
            None => Err(CryptoError::KeyNotFound(id.to_string()).into()),
        }
    }

    fn list_recipients(&self, _opts: &Options) -> Result<Vec<String>> {
        Ok(lock(&self.pubring).fingerprints())
    }

    fn list_identities(&self, _opts: &Options) -> Result<Vec<String>> {
        Ok(lock(&self.secring).fingerprints())
    }

    fn find_recipients(&self, _opts: &Options, needles: &[String]) -> Result<Vec<String>> {
        let pubring = lock(&self.pubring);
        let mut found: Vec<String> = Vec::new();
        for needle in needles {
            if let Some(key) = pubring.find(needle) {
                if !found.iter().any(|fp| fp == key.fingerprint()) {
                    found.push(key.fingerprint().to_string());
                }
            }
        }
        Ok(found)
    }

    fn find_identities(&self, _opts: &Options, needles: &[String]) -> Result<Vec<String>> {
        let secring = lock(&self.secring);
        let mut found: Vec<String> = Vec::new();
        for needle in needles {
            if let Some(key) = secring.find(needle) {
                if !found.iter().any(|fp| fp == key.fingerprint()) {
                    found.push(key.fingerprint().to_string());
                }
            }
        }
        Ok(found)
    }

    fn fingerprint(&self, _opts: &Options, id: &str) -> String {
        if let Some(key) = lock(&self.pubring).find(id) {
            return key.fingerprint().to_string();
        }
        lock(&self.secring)
            .find(id)
            .map(|k| k.fingerprint().to_string())
            .unwrap_or_else(|| id.to_string())
    }

    fn format_key(&self, opts: &Options, id: &str) -> String {
        let fp = self.fingerprint(opts, id);
        match lock(&self.pubring).get(&fp) {
            Some(key) => format!("{} - {}", fp, key.identity()),
            None => id.to_string(),
        }
    }

    fn read_names_from_key(&self, _opts: &Options, buf: &[u8]) -> Result<Vec<String>> {
        let key = PublicKey::decode(buf)?;
        Ok(vec![key.identity().to_string()])
    }

    fn create_private_key(
        &self,
        _opts: &Options,
        name: &str,
        email: &str,
        passphrase: &SecretString,
    ) -> Result<String> {
        let identity = Identity {
            name: name.to_string(),
            email: email.to_string(),
            comment: None,
        };
        let (key, unlocked) = PrivateKey::generate(identity, passphrase, &self.kdf)?;
        let fp = key.fingerprint().to_string();
        {
            let mut pubring = lock(&self.pubring);
            pubring.insert(key.public().clone());
            pubring.save()?;
        }
        {
            let mut secring = lock(&self.secring);
            secring.insert(key);
            secring.save()?;
        }
        lock(&self.unlocked).insert(fp.clone(), unlocked);
        debug!(fingerprint = %fp, "generated xc key");
        Ok(fp)
    }
}

impl Crypto for Xc {
    fn name(&self) -> &'static str {
        "xc"
    }

    fn ext(&self) -> &'static str {
        "xc"
    }

    fn id_file(&self) -> &'static str {
        ".xc-ids"
    }

    fn encrypt(&self, opts: &Options, plaintext: &[u8], recipients: &[String]) -> Result<Vec<u8>> {
        let (header, cipher) = self.seal_header(opts, recipients)?;
        let compressed = message::maybe_compress(plaintext).map(Zeroizing::new);
        let body: &[u8] = compressed.as_deref().map_or(plaintext, |c| c.as_slice());

        let mut chunks = Vec::with_capacity(body.len().div_ceil(CHUNK_SIZE));
        for (index, part) in body.chunks(CHUNK_SIZE).enumerate() {
            chunks.push(message::Chunk {
                body: cipher.seal(index as u64, part)?,
            });
        }
        trace!(
            recipients = header.recipients.len(),
            chunks = chunks.len(),
            compressed = compressed.is_some(),
            "encrypted xc message"
        );
        Message {
            header,
            compressed: compressed.is_some(),
            chunks,
        }
        .encode()
    }

    fn decrypt(&self, opts: &Options, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let msg = Message::decode(ciphertext).map_err(opaque)?;
        let cipher = self.open_header(opts, &msg.header)?;
        let mut plaintext = Zeroizing::new(Vec::with_capacity(msg.chunks.len() * CHUNK_SIZE));
        for (index, chunk) in msg.chunks.iter().enumerate() {
            plaintext.extend_from_slice(&cipher.open(index as u64, &chunk.body)?);
        }
        if msg.compressed {
            return message::decompress(&plaintext);
        }
        Ok(plaintext)
    }

    fn recipient_ids(&self, _opts: &Options, ciphertext: &[u8]) -> Result<Vec<String>> {
        Ok(Message::decode(ciphertext)?.recipient_ids())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::agent::CachingAgent;
    use rand::RngCore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn backend() -> Xc {
        Xc::in_memory(
            Arc::new(CachingAgent::fixed("pw")),
            KdfParams::insecure_fast(),
        )
    }

    fn with_key(name: &str) -> (Xc, String) {
        let xc = backend();
        let fp = xc
            .create_private_key(
                &Options::default(),
                name,
                &format!("{name}@example.com"),
                &SecretString::from("pw"),
            )
            .unwrap();
        (xc, fp)
    }

    fn random(len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        rand::rngs::OsRng.fill_bytes(&mut buf);
        buf
    }

    #[test]
    fn test_round_trip_compressible() {
        let (xc, fp) = with_key("alice");
        let opts = Options::default();
        let plaintext = b"password\n".repeat(500);
        let ct = xc.encrypt(&opts, &plaintext, &[fp.clone()]).unwrap();
        let msg = Message::decode(&ct).unwrap();
        assert!(msg.compressed);
        assert_eq!(msg.header.sender, fp);
        assert_eq!(xc.decrypt(&opts, &ct).unwrap().as_slice(), plaintext.as_slice());
        assert_eq!(xc.recipient_ids(&opts, &ct).unwrap(), vec![fp]);
    }

    #[test]
    fn test_ten_chunks_and_reorder_detection() {
        let (xc, fp) = with_key("alice");
        let opts = Options::default();
        let plaintext = random(10 * CHUNK_SIZE);
        let ct = xc.encrypt(&opts, &plaintext, &[fp]).unwrap();

        let mut msg = Message::decode(&ct).unwrap();
        assert!(!msg.compressed);
        assert_eq!(msg.chunks.len(), 10);
        assert!(msg
            .chunks
            .iter()
            .all(|c| c.body.len() == CHUNK_SIZE + 16));
        assert_eq!(xc.decrypt(&opts, &ct).unwrap().as_slice(), plaintext.as_slice());

        msg.chunks.swap(0, 1);
        let swapped = msg.encode().unwrap();
        let err = xc.decrypt(&opts, &swapped).unwrap_err();
        assert!(matches!(err, Error::Crypto(CryptoError::Decrypt)));
    }

    #[test]
    fn test_byte_flip_fails() {
        let (xc, fp) = with_key("alice");
        let opts = Options::default();
        let ct = xc.encrypt(&opts, &random(100), &[fp]).unwrap();
        for i in [0, ct.len() / 2, ct.len() - 1] {
            let mut bad = ct.clone();
            bad[i] ^= 0x01;
            assert!(xc.decrypt(&opts, &bad).is_err(), "flip at {i} accepted");
        }
    }

    #[test]
    fn test_two_keyrings() {
        let (alice, alice_fp) = with_key("alice");
        let (bob, bob_fp) = with_key("bob");
        let opts = Options::default();

        alice
            .import_public_key(&opts, &bob.export_public_key(&opts, &bob_fp).unwrap())
            .unwrap();
        bob.import_public_key(&opts, &alice.export_public_key(&opts, &alice_fp).unwrap())
            .unwrap();

        let ct = alice
            .encrypt(&opts, b"shared", &[alice_fp.clone(), bob_fp.clone()])
            .unwrap();
        assert_eq!(bob.decrypt(&opts, &ct).unwrap().as_slice(), b"shared");

        let only_alice = alice.encrypt(&opts, b"mine", &[alice_fp]).unwrap();
        let err = bob.decrypt(&opts, &only_alice).unwrap_err();
        assert!(matches!(err, Error::Crypto(CryptoError::NoIdentity)));
    }

    #[test]
    fn test_unknown_sender_fails() {
        let (alice, alice_fp) = with_key("alice");
        let (bob, bob_fp) = with_key("bob");
        let opts = Options::default();
        alice
            .import_public_key(&opts, &bob.export_public_key(&opts, &bob_fp).unwrap())
            .unwrap();
        let ct = alice.encrypt(&opts, b"x", &[alice_fp, bob_fp]).unwrap();
        let err = bob.decrypt(&opts, &ct).unwrap_err();
        assert!(matches!(err, Error::Crypto(CryptoError::Decrypt)));
    }

    #[test]
    fn test_unknown_recipient_is_encrypt_error() {
        let (xc, _) = with_key("alice");
        let err = xc
            .encrypt(&Options::default(), b"x", &["DEADBEEF".to_string()])
            .unwrap_err();
        assert!(matches!(err, Error::Crypto(CryptoError::Encrypt(_))));
    }

    #[test]
    fn test_unlock_retries_then_succeeds() {
        let dir = TempDir::new().unwrap();
        let opts = Options::default();
        let fp = Xc::open(
            dir.path(),
            Arc::new(CachingAgent::fixed("pw")),
            KdfParams::insecure_fast(),
        )
        .unwrap()
        .create_private_key(&opts, "a", "a@x", &SecretString::from("pw"))
        .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let agent = CachingAgent::new(Arc::new(move |_: &str, _: &str| {
            let n = c.fetch_add(1, Ordering::SeqCst);
            Ok(SecretString::from(if n < 2 { "wrong" } else { "pw" }))
        }));
        let xc = Xc::open(dir.path(), Arc::new(agent), KdfParams::insecure_fast()).unwrap();
        let ct = xc.encrypt(&opts, b"hello", &[fp]).unwrap();
        assert_eq!(xc.decrypt(&opts, &ct).unwrap().as_slice(), b"hello");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unlock_gives_up_after_three_attempts() {
        let dir = TempDir::new().unwrap();
        let opts = Options::default();
        let fp = Xc::open(
            dir.path(),
            Arc::new(CachingAgent::fixed("pw")),
            KdfParams::insecure_fast(),
        )
        .unwrap()
        .create_private_key(&opts, "a", "a@x", &SecretString::from("pw"))
        .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let agent = CachingAgent::new(Arc::new(move |_: &str, _: &str| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(SecretString::from("wrong"))
        }));
        let xc = Xc::open(dir.path(), Arc::new(agent), KdfParams::insecure_fast()).unwrap();
        let err = xc.encrypt(&opts, b"x", &[fp]).unwrap_err();
        assert!(matches!(err, Error::Crypto(CryptoError::Locked(_))));
        assert_eq!(calls.load(Ordering::SeqCst), MAX_UNLOCK_ATTEMPTS);
    }

    #[test]
    fn test_password_callback_takes_precedence() {
        let dir = TempDir::new().unwrap();
        let fp = Xc::open(
            dir.path(),
            Arc::new(CachingAgent::fixed("pw")),
            KdfParams::insecure_fast(),
        )
        .unwrap()
        .create_private_key(&Options::default(), "a", "a@x", &SecretString::from("pw"))
        .unwrap();

        let xc = Xc::open(
            dir.path(),
            Arc::new(CachingAgent::non_interactive()),
            KdfParams::insecure_fast(),
        )
        .unwrap();
        let mut opts = Options::default();
        opts.password_cb = Some(Arc::new(|_: &str, _: &str| Some(SecretString::from("pw"))));
        assert!(xc.encrypt(&opts, b"x", &[fp]).is_ok());
    }

    #[test]
    fn test_stream_round_trip() {
        let (xc, fp) = with_key("alice");
        let opts = Options::default();
        let plaintext = random(3 * CHUNK_SIZE + 17);
        let mut ct = Vec::new();
        xc.encrypt_stream(&opts, plaintext.as_slice(), &mut ct, &[fp])
            .unwrap();
        assert_eq!(Message::decode(&ct).unwrap().chunks.len(), 4);

        let mut out = Vec::new();
        xc.decrypt_stream(&opts, ct.as_slice(), &mut out).unwrap();
        assert_eq!(out, plaintext);

        let me = xc.list_identities(&opts).unwrap();
        let whole = xc.encrypt(&opts, &b"abc".repeat(100), &me).unwrap();
        let mut out = Vec::new();
        xc.decrypt_stream(&opts, whole.as_slice(), &mut out).unwrap();
        assert_eq!(out, b"abc".repeat(100));
    }

    #[test]
    fn test_private_key_export_import() {
        let (alice, fp) = with_key("alice");
        let opts = Options::default();
        let exported = alice.export_private_key(&fp).unwrap();
        let ct = alice.encrypt(&opts, b"s", &[fp.clone()]).unwrap();

        let other = backend();
        assert_eq!(other.import_private_key(&exported).unwrap(), fp);
        assert_eq!(other.list_identities(&opts).unwrap(), vec![fp.clone()]);
        assert_eq!(other.decrypt(&opts, &ct).unwrap().as_slice(), b"s");

        other.remove_key(&fp).unwrap();
        assert!(other.list_identities(&opts).unwrap().is_empty());
        assert!(other.remove_key(&fp).is_err());
    }

    #[test]
    fn test_keyring_lookups() {
        let (xc, fp) = with_key("alice");
        let opts = Options::default();
        let short = fp[fp.len() - 16..].to_string();
        assert_eq!(xc.fingerprint(&opts, &short), fp);
        assert_eq!(xc.fingerprint(&opts, "nobody"), "nobody");
        assert_eq!(
            xc.find_recipients(&opts, &["alice@example.com".into(), short.clone()])
                .unwrap(),
            vec![fp.clone()]
        );
        assert_eq!(xc.find_identities(&opts, &[short]).unwrap(), vec![fp.clone()]);
        assert!(xc.format_key(&opts, &fp).contains("alice <alice@example.com>"));
        let exported = xc.export_public_key(&opts, &fp).unwrap();
        assert_eq!(
            xc.read_names_from_key(&opts, &exported).unwrap(),
            vec!["alice <alice@example.com>".to_string()]
        );
    }

    #[test]
    fn test_keyring_persists() {
        let dir = TempDir::new().unwrap();
        let opts = Options::default();
        let fp = {
            let xc = Xc::open(
                dir.path(),
                Arc::new(CachingAgent::fixed("pw")),
                KdfParams::insecure_fast(),
            )
            .unwrap();
            xc.create_private_key(&opts, "a", "a@x", &SecretString::from("pw"))
                .unwrap()
        };
        assert!(dir.path().join(PUBRING_FILE).exists());
        assert!(dir.path().join(SECRING_FILE).exists());
        let xc = Xc::open(
            dir.path(),
            Arc::new(CachingAgent::fixed("pw")),
            KdfParams::insecure_fast(),
        )
        .unwrap();
        assert_eq!(xc.list_recipients(&opts).unwrap(), vec![fp]);
    }
}
