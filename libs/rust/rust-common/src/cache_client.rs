//! Namespaced, TTL-aware cache client.
//!
//! Values are optionally encrypted at rest with AES-256-GCM. Besides plain
//! get/set/delete the client offers an atomic compare-and-swap and small
//! member sets, which is what optimistic-concurrency callers need when the
//! cache is the shared record store.

use crate::PlatformError;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const NONCE_LEN: usize = 12;

/// Cache client configuration.
#[derive(Debug, Clone)]
pub struct CacheClientConfig {
    /// Namespace for key isolation
    pub namespace: String,
    /// Default TTL for cache entries
    pub default_ttl: Duration,
    /// Entry count above which expired entries are swept on write
    pub max_entries: usize,
    /// Encryption key (32 bytes for AES-256)
    pub encryption_key: Option<[u8; 32]>,
}

impl Default for CacheClientConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            default_ttl: Duration::from_secs(3600),
            max_entries: 100_000,
            encryption_key: None,
        }
    }
}

impl CacheClientConfig {
    /// Set the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the default TTL.
    #[must_use]
    pub const fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the sweep threshold.
    #[must_use]
    pub const fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Enable encryption at rest.
    #[must_use]
    pub const fn with_encryption_key(mut self, key: [u8; 32]) -> Self {
        self.encryption_key = Some(key);
        self
    }
}

/// Result of [`CacheClient::compare_and_swap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    /// The stored value matched and was replaced
    Swapped,
    /// The stored value differed; nothing was written
    Changed,
    /// No live value exists under the key
    Missing,
}

enum Stored {
    Bytes(Vec<u8>),
    Members(BTreeSet<String>),
}

struct Entry {
    value: Stored,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-process cache client with namespace isolation and optional encryption.
pub struct CacheClient {
    config: CacheClientConfig,
    entries: RwLock<HashMap<String, Entry>>,
    cipher: Option<Aes256Gcm>,
}

impl CacheClient {
    /// Create a new cache client.
    #[must_use]
    pub fn new(config: CacheClientConfig) -> Self {
        let cipher = config.encryption_key.map(|key| Aes256Gcm::new(&key.into()));
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            cipher,
        }
    }

    /// Get a value.
    ///
    /// # Errors
    ///
    /// Returns an error if decryption fails.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PlatformError> {
        let key = self.namespaced_key(key);
        let entries = self.entries.read().await;
        match entries.get(&key) {
            Some(Entry {
                value: Stored::Bytes(bytes),
                expires_at,
            }) if *expires_at > Instant::now() => Ok(Some(self.decrypt(bytes)?)),
            _ => Ok(None),
        }
    }

    /// Set a value, replacing whatever was stored.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails.
    pub async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), PlatformError> {
        let key = self.namespaced_key(key);
        let sealed = self.encrypt(value)?;
        let expires_at = Instant::now() + ttl.unwrap_or(self.config.default_ttl);

        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            Entry {
                value: Stored::Bytes(sealed),
                expires_at,
            },
        );
        self.sweep_if_full(&mut entries);
        Ok(())
    }

    /// Replace the value under `key` only if it currently equals `expected`.
    ///
    /// The comparison and the write happen under one lock, so concurrent
    /// swaps against the same expected value have exactly one winner.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption or decryption fails.
    pub async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<SwapOutcome, PlatformError> {
        let key = self.namespaced_key(key);
        let sealed = self.encrypt(value)?;
        let now = Instant::now();

        let mut entries = self.entries.write().await;
        let current = match entries.get(&key) {
            Some(Entry {
                value: Stored::Bytes(bytes),
                expires_at,
            }) if *expires_at > now => self.decrypt(bytes)?,
            _ => return Ok(SwapOutcome::Missing),
        };

        if current != expected {
            return Ok(SwapOutcome::Changed);
        }

        entries.insert(
            key,
            Entry {
                value: Stored::Bytes(sealed),
                expires_at: now + ttl.unwrap_or(self.config.default_ttl),
            },
        );
        Ok(SwapOutcome::Swapped)
    }

    /// Delete a value or member set.
    pub async fn delete(&self, key: &str) {
        let key = self.namespaced_key(key);
        self.entries.write().await.remove(&key);
    }

    /// Check whether a live entry exists.
    pub async fn exists(&self, key: &str) -> bool {
        let key = self.namespaced_key(key);
        let entries = self.entries.read().await;
        entries.get(&key).is_some_and(|e| e.is_live(Instant::now()))
    }

    /// Add a member to the set under `key`, extending its TTL to at least `ttl`.
    ///
    /// A plain value stored under the same key is replaced by the set.
    pub async fn add_member(&self, key: &str, member: &str, ttl: Option<Duration>) {
        let key = self.namespaced_key(key);
        let now = Instant::now();
        let expires_at = now + ttl.unwrap_or(self.config.default_ttl);

        let mut entries = self.entries.write().await;
        if let Some(Entry {
            value: Stored::Members(members),
            expires_at: current,
        }) = entries.get_mut(&key).filter(|e| e.is_live(now))
        {
            members.insert(member.to_string());
            if expires_at > *current {
                *current = expires_at;
            }
            return;
        }

        entries.insert(
            key,
            Entry {
                value: Stored::Members(BTreeSet::from([member.to_string()])),
                expires_at,
            },
        );
        self.sweep_if_full(&mut entries);
    }

    /// Remove a member from the set under `key`. The set is dropped once empty.
    pub async fn remove_member(&self, key: &str, member: &str) {
        let key = self.namespaced_key(key);
        let mut entries = self.entries.write().await;
        let emptied = match entries.get_mut(&key) {
            Some(Entry {
                value: Stored::Members(members),
                ..
            }) => {
                members.remove(member);
                members.is_empty()
            }
            _ => false,
        };
        if emptied {
            entries.remove(&key);
        }
    }

    /// Members of the set under `key`, empty when absent or expired.
    pub async fn members(&self, key: &str) -> Vec<String> {
        let key = self.namespaced_key(key);
        let entries = self.entries.read().await;
        match entries.get(&key) {
            Some(Entry {
                value: Stored::Members(members),
                expires_at,
            }) if *expires_at > Instant::now() => members.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Get the namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Number of stored entries, live or not yet swept.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the client holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn namespaced_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.namespace, key)
    }

    fn sweep_if_full(&self, entries: &mut HashMap<String, Entry>) {
        if entries.len() > self.config.max_entries {
            let now = Instant::now();
            entries.retain(|_, e| e.is_live(now));
        }
    }

    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, PlatformError> {
        let Some(ref cipher) = self.cipher else {
            return Ok(data.to_vec());
        };

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), data)
            .map_err(|e| PlatformError::encryption(e.to_string()))?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend(ciphertext);
        Ok(sealed)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, PlatformError> {
        let Some(ref cipher) = self.cipher else {
            return Ok(data.to_vec());
        };

        if data.len() < NONCE_LEN {
            return Err(PlatformError::encryption("Data too short for decryption"));
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| PlatformError::encryption(e.to_string()))
    }
}
