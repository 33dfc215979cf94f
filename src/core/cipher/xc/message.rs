//! XC message framing and sealing primitives.
//!
//! Stream layout:
//!
//! ```text
//! version(u8 = 1) | bincode(Header) | compressed(u8) | (uvarint len | chunk)*
//! ```
//!
//! Each chunk is `secretbox(session_key, nonce(i), plaintext_i)` where
//! `nonce(i)` is the big-endian chunk index zero-padded to 24 bytes. The
//! older whole-message layout (`bincode(LegacyMessage)`, starting with a
//! little-endian `u32` version) is still accepted on read.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use crypto_box::aead::Aead;
use crypto_box::SalsaBox;
use crypto_secretbox::aead::KeyInit;
use crypto_secretbox::XSalsa20Poly1305;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::key::{UnlockedKey, KEY_LEN, NONCE_LEN};
use crate::error::{CryptoError, Result};

/// Maximum plaintext bytes per chunk.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Current stream format version.
pub const STREAM_VERSION: u8 = 1;

/// Poly1305 tag length.
const TAG_LEN: usize = 16;

/// Largest accepted frame; anything bigger is malformed.
const MAX_FRAME: u64 = (CHUNK_SIZE + TAG_LEN) as u64;

/// Sealed session keys plus the sender's fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub sender: String,
    /// Recipient fingerprint to `nonce || sealed session key`.
    pub recipients: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub body: Vec<u8>,
}

/// A fully materialized message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub compressed: bool,
    pub chunks: Vec<Chunk>,
}

#[derive(Serialize, Deserialize)]
struct LegacyMessage {
    version: u32,
    header: Header,
    compressed: bool,
    chunks: Vec<Chunk>,
}

impl Message {
    /// Parse either layout.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() >= 4 && buf[..4] == [1, 0, 0, 0] {
            let legacy: LegacyMessage =
                bincode::deserialize(buf).map_err(|e| CryptoError::Format(e.to_string()))?;
            return Ok(Self {
                header: legacy.header,
                compressed: legacy.compressed,
                chunks: legacy.chunks,
            });
        }
        let mut reader = buf;
        let (header, compressed) = read_header(&mut reader)?;
        let mut chunks = Vec::new();
        while let Some(body) = read_chunk(&mut reader)? {
            chunks.push(Chunk { body });
        }
        Ok(Self {
            header,
            compressed,
            chunks,
        })
    }

    /// Serialize in the stream layout.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        write_header(&mut out, &self.header, self.compressed)?;
        for chunk in &self.chunks {
            write_chunk(&mut out, &chunk.body)?;
        }
        Ok(out)
    }

    /// Sorted recipient fingerprints.
    pub fn recipient_ids(&self) -> Vec<String> {
        self.header.recipients.keys().cloned().collect()
    }
}

fn io_format(e: io::Error) -> CryptoError {
    CryptoError::Format(e.to_string())
}

/// Write the version byte, header and compression flag.
pub fn write_header<W: Write>(w: &mut W, header: &Header, compressed: bool) -> Result<()> {
    w.write_all(&[STREAM_VERSION])?;
    bincode::serialize_into(&mut *w, header).map_err(|e| CryptoError::Format(e.to_string()))?;
    w.write_all(&[u8::from(compressed)])?;
    Ok(())
}

/// Read the version byte, header and compression flag.
pub fn read_header<R: Read>(r: &mut R) -> Result<(Header, bool)> {
    let mut byte = [0u8; 1];
    r.read_exact(&mut byte).map_err(io_format)?;
    if byte[0] != STREAM_VERSION {
        return Err(CryptoError::Format(format!("unsupported message version {}", byte[0])).into());
    }
    let header: Header =
        bincode::deserialize_from(&mut *r).map_err(|e| CryptoError::Format(e.to_string()))?;
    r.read_exact(&mut byte).map_err(io_format)?;
    let compressed = match byte[0] {
        0 => false,
        1 => true,
        other => return Err(CryptoError::Format(format!("bad compression flag {other}")).into()),
    };
    Ok((header, compressed))
}

pub fn write_chunk<W: Write>(w: &mut W, body: &[u8]) -> Result<()> {
    write_uvarint(w, body.len() as u64)?;
    w.write_all(body)?;
    Ok(())
}

/// Next framed chunk, or `None` at a clean end of stream.
pub fn read_chunk<R: Read>(r: &mut R) -> Result<Option<Vec<u8>>> {
    let Some(len) = read_uvarint(r)? else {
        return Ok(None);
    };
    if len > MAX_FRAME {
        return Err(CryptoError::Format(format!("chunk of {len} bytes exceeds limit")).into());
    }
    let mut body = vec![0u8; len as usize];
    r.read_exact(&mut body).map_err(io_format)?;
    Ok(Some(body))
}

fn write_uvarint<W: Write>(w: &mut W, mut value: u64) -> Result<()> {
    let mut buf = [0u8; 10];
    let mut i = 0;
    while value >= 0x80 {
        buf[i] = (value as u8) | 0x80;
        value >>= 7;
        i += 1;
    }
    buf[i] = value as u8;
    w.write_all(&buf[..=i])?;
    Ok(())
}

/// Unsigned LEB128. `None` if the reader is at EOF before the first byte.
fn read_uvarint<R: Read>(r: &mut R) -> Result<Option<u64>> {
    let mut value = 0u64;
    let mut shift = 0u32;
    let mut byte = [0u8; 1];
    for i in 0..10 {
        match r.read(&mut byte) {
            Ok(0) if i == 0 => return Ok(None),
            Ok(0) => return Err(CryptoError::Format("truncated varint".into()).into()),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(io_format(e).into()),
        }
        let b = byte[0];
        if i == 9 && b > 1 {
            return Err(CryptoError::Format("varint overflows u64".into()).into());
        }
        value |= u64::from(b & 0x7f) << shift;
        if b < 0x80 {
            return Ok(Some(value));
        }
        shift += 7;
    }
    Err(CryptoError::Format("varint overflows u64".into()).into())
}

/// Fresh random session key.
pub fn session_key() -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    OsRng.fill_bytes(key.as_mut());
    key
}

/// Seal `session` from `sender` to `recipient`; returns `nonce || sealed`.
pub fn seal_session_key(
    sender: &UnlockedKey,
    recipient: &crypto_box::PublicKey,
    session: &[u8; KEY_LEN],
) -> Result<Vec<u8>> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let sealed = SalsaBox::new(recipient, &sender.box_key())
        .encrypt(
            crypto_box::aead::Nonce::<SalsaBox>::from_slice(&nonce),
            session.as_slice(),
        )
        .map_err(|_| CryptoError::Encrypt("failed to seal session key".into()))?;
    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Open a sealed session key. Any failure is `CryptoError::Decrypt`.
pub fn open_session_key(
    recipient: &UnlockedKey,
    sender: &crypto_box::PublicKey,
    sealed: &[u8],
) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    if sealed.len() != NONCE_LEN + KEY_LEN + TAG_LEN {
        return Err(CryptoError::Decrypt.into());
    }
    let (nonce, body) = sealed.split_at(NONCE_LEN);
    let opened = Zeroizing::new(
        SalsaBox::new(sender, &recipient.box_key())
            .decrypt(crypto_box::aead::Nonce::<SalsaBox>::from_slice(nonce), body)
            .map_err(|_| CryptoError::Decrypt)?,
    );
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(&opened);
    Ok(key)
}

fn chunk_nonce(index: u64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..8].copy_from_slice(&index.to_be_bytes());
    nonce
}

/// Symmetric chunk cipher bound to one session key.
pub struct ChunkCipher {
    cipher: XSalsa20Poly1305,
}

impl ChunkCipher {
    pub fn new(session: &[u8; KEY_LEN]) -> Result<Self> {
        let cipher = XSalsa20Poly1305::new_from_slice(session)
            .map_err(|e| CryptoError::Format(e.to_string()))?;
        Ok(Self { cipher })
    }

    pub fn seal(&self, index: u64, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = chunk_nonce(index);
        crypto_secretbox::aead::Aead::encrypt(
            &self.cipher,
            crypto_secretbox::aead::Nonce::<XSalsa20Poly1305>::from_slice(&nonce),
            plaintext,
        )
        .map_err(|_| CryptoError::Encrypt(format!("failed to seal chunk {index}")).into())
    }

    /// Open chunk `index`. A chunk moved to another position fails here.
    pub fn open(&self, index: u64, body: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let nonce = chunk_nonce(index);
        crypto_secretbox::aead::Aead::decrypt(
            &self.cipher,
            crypto_secretbox::aead::Nonce::<XSalsa20Poly1305>::from_slice(&nonce),
            body,
        )
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::Decrypt.into())
    }
}

/// Compress `plaintext` only when that makes it strictly smaller.
pub fn maybe_compress(plaintext: &[u8]) -> Option<Vec<u8>> {
    let compressed = zstd::encode_all(plaintext, 0).ok()?;
    (compressed.len() < plaintext.len()).then_some(compressed)
}

pub fn decompress(buf: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    zstd::decode_all(buf)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::Decrypt.into())
}
