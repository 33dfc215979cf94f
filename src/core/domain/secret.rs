//! Secret plaintext model.
//!
//! A secret is opaque bytes. The first line is read as the password and the
//! rest as the body; a body starting with `---` is a YAML document, any other
//! body is scanned for `key: value` lines. Parsing never alters the bytes.

use std::collections::BTreeMap;

use zeroize::Zeroizing;

use crate::error::SecretError;

const YAML_MARK: &str = "---";

/// Decrypted secret contents.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    raw: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("len", &self.raw.len())
            .finish_non_exhaustive()
    }
}

impl Secret {
    /// Wrap plaintext bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            raw: Zeroizing::new(bytes.into()),
        }
    }

    /// Build a secret from a password line and an optional body.
    pub fn from_parts(password: &str, body: &str) -> Self {
        let mut buf = Vec::with_capacity(password.len() + body.len() + 1);
        buf.extend_from_slice(password.as_bytes());
        if !body.is_empty() {
            buf.push(b'\n');
            buf.extend_from_slice(body.as_bytes());
        }
        Self::new(buf)
    }

    /// The exact plaintext bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    fn split(&self) -> (&[u8], Option<&[u8]>) {
        match self.raw.iter().position(|&b| b == b'\n') {
            Some(i) => (&self.raw[..i], Some(&self.raw[i + 1..])),
            None => (&self.raw[..], None),
        }
    }

    /// The first line, without its line terminator.
    ///
    /// # Errors
    ///
    /// Returns `SecretError::NoPassword` if the first line is empty.
    pub fn password(&self) -> Result<Zeroizing<String>, SecretError> {
        let (first, _) = self.split();
        let first = first.strip_suffix(b"\r").unwrap_or(first);
        if first.is_empty() {
            return Err(SecretError::NoPassword);
        }
        Ok(Zeroizing::new(String::from_utf8_lossy(first).into_owned()))
    }

    /// Everything after the first line.
    ///
    /// # Errors
    ///
    /// Returns `SecretError::NoBody` if there is nothing after the password.
    pub fn body(&self) -> Result<Zeroizing<String>, SecretError> {
        match self.split() {
            (_, Some(body)) if !body.is_empty() => {
                Ok(Zeroizing::new(String::from_utf8_lossy(body).into_owned()))
            }
            _ => Err(SecretError::NoBody),
        }
    }

    /// Whether the body is a YAML document.
    pub fn is_yaml(&self) -> bool {
        self.body()
            .map(|b| b.lines().next().map(str::trim_end) == Some(YAML_MARK))
            .unwrap_or(false)
    }

    /// Parse the body as a YAML document.
    ///
    /// # Errors
    ///
    /// Returns `SecretError::YamlNoMark` when the body does not start with
    /// `---`, or `SecretError::Yaml` when it fails to parse.
    pub fn yaml(&self) -> Result<serde_yml::Value, SecretError> {
        if !self.is_yaml() {
            return Err(SecretError::YamlNoMark);
        }
        let body = self.body()?;
        serde_yml::from_str(&body).map_err(|e| SecretError::Yaml(e.to_string()))
    }

    /// Key/value pairs found in the body.
    ///
    /// YAML bodies contribute their top-level scalar entries; other bodies
    /// contribute every `key: value` line.
    pub fn data(&self) -> Result<BTreeMap<String, String>, SecretError> {
        if self.is_yaml() {
            let mut out = BTreeMap::new();
            match self.yaml()? {
                serde_yml::Value::Mapping(map) => {
                    for (k, v) in map {
                        if let (Some(k), Some(v)) = (scalar(&k), scalar(&v)) {
                            out.insert(k, v);
                        }
                    }
                }
                serde_yml::Value::Null => {}
                _ => return Err(SecretError::YamlUnsupported("document".to_string())),
            }
            return Ok(out);
        }

        let body = match self.body() {
            Ok(body) => body,
            Err(SecretError::NoBody) => return Ok(BTreeMap::new()),
            Err(e) => return Err(e),
        };
        Ok(body
            .lines()
            .filter_map(|line| {
                let (k, v) = line.split_once(':')?;
                let k = k.trim();
                if k.is_empty() || k.contains(' ') {
                    return None;
                }
                Some((k.to_string(), v.trim().to_string()))
            })
            .collect())
    }

    /// Look up a single body value.
    ///
    /// # Errors
    ///
    /// Returns `SecretError::YamlNoKey` for missing keys and
    /// `SecretError::YamlUnsupported` for nested YAML values.
    pub fn get(&self, key: &str) -> Result<String, SecretError> {
        if self.is_yaml() {
            if let serde_yml::Value::Mapping(map) = self.yaml()? {
                for (k, v) in map {
                    if scalar(&k).as_deref() == Some(key) {
                        return scalar(&v)
                            .ok_or_else(|| SecretError::YamlUnsupported(key.to_string()));
                    }
                }
            }
            return Err(SecretError::YamlNoKey(key.to_string()));
        }
        self.data()?
            .remove(key)
            .ok_or_else(|| SecretError::YamlNoKey(key.to_string()))
    }

    /// Sorted body keys.
    pub fn keys(&self) -> Result<Vec<String>, SecretError> {
        Ok(self.data()?.into_keys().collect())
    }
}

fn scalar(v: &serde_yml::Value) -> Option<String> {
    match v {
        serde_yml::Value::String(s) => Some(s.clone()),
        serde_yml::Value::Number(n) => Some(n.to_string()),
        serde_yml::Value::Bool(b) => Some(b.to_string()),
        serde_yml::Value::Null => Some(String::new()),
        _ => None,
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes())
    }
}

impl From<Vec<u8>> for Secret {
    fn from(v: Vec<u8>) -> Self {
        Self::new(v)
    }
}
