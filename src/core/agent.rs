//! Passphrase agent.
//!
//! Crypto backends ask the agent for a key's passphrase. The default agent
//! fronts a prompt callback with an in-memory cache keyed by fingerprint.
//! The cache lock is never held while prompting.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};

/// Idle time after which a cached passphrase is dropped.
pub const CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Hard upper bound on how long a passphrase stays cached.
pub const CACHE_MAX_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Supplies passphrases on demand.
pub trait Agent: Send + Sync + fmt::Debug {
    /// Passphrase for `key`; `reason` is shown to the user when prompting.
    fn passphrase(&self, key: &str, reason: &str) -> Result<SecretString>;

    /// Forget any cached passphrase for `key`.
    fn remove(&self, key: &str);

    /// Check the agent is reachable.
    fn ping(&self) -> Result<()>;
}

/// Prompt used on cache miss; arguments are key id and reason.
pub type PromptFn = Arc<dyn Fn(&str, &str) -> Result<SecretString> + Send + Sync>;

struct Entry {
    passphrase: Zeroizing<String>,
    created: Instant,
    last_used: Instant,
}

/// In-memory caching agent.
pub struct CachingAgent {
    prompt: PromptFn,
    ttl: Duration,
    max_lifetime: Duration,
    cache: Mutex<HashMap<String, Entry>>,
}

impl fmt::Debug for CachingAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingAgent")
            .field("ttl", &self.ttl)
            .field("max_lifetime", &self.max_lifetime)
            .finish_non_exhaustive()
    }
}

impl CachingAgent {
    pub fn new(prompt: PromptFn) -> Self {
        Self::with_limits(prompt, CACHE_TTL, CACHE_MAX_LIFETIME)
    }

    pub fn with_limits(prompt: PromptFn, ttl: Duration, max_lifetime: Duration) -> Self {
        Self {
            prompt,
            ttl,
            max_lifetime,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Agent that answers every request with the same passphrase.
    pub fn fixed(passphrase: &str) -> Self {
        let passphrase = passphrase.to_string();
        Self::new(Arc::new(move |_: &str, _: &str| Ok(SecretString::from(passphrase.clone()))))
    }

    /// Agent without a prompt; only cached passphrases are returned.
    pub fn non_interactive() -> Self {
        Self::new(Arc::new(|key: &str, _: &str| {
            Err(CryptoError::Locked(key.to_string()).into())
        }))
    }

    fn cached(&self, key: &str) -> Option<SecretString> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let expired = match cache.get(key) {
            Some(entry) => {
                now.duration_since(entry.last_used) >= self.ttl
                    || now.duration_since(entry.created) >= self.max_lifetime
            }
            None => return None,
        };
        if expired {
            trace!(key, "cached passphrase expired");
            cache.remove(key);
            return None;
        }
        let entry = cache.get_mut(key)?;
        entry.last_used = now;
        Some(SecretString::from(entry.passphrase.to_string()))
    }

    /// Number of cached passphrases.
    pub fn len(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Agent for CachingAgent {
    fn passphrase(&self, key: &str, reason: &str) -> Result<SecretString> {
        if let Some(pass) = self.cached(key) {
            trace!(key, "passphrase cache hit");
            return Ok(pass);
        }
        debug!(key, "prompting for passphrase");
        let pass = (self.prompt)(key, reason)?;
        let now = Instant::now();
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).insert(
            key.to_string(),
            Entry {
                passphrase: Zeroizing::new(pass.expose_secret().to_string()),
                created: now,
                last_used: now,
            },
        );
        Ok(pass)
    }

    fn remove(&self, key: &str) {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    fn ping(&self) -> Result<()> {
        Ok(())
    }
}
