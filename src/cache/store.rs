//! Cache store — persistence tier behind the token cache.
//!
//! The [`CacheStore`] trait abstracts over storage backends. The shipped
//! implementation is [`InMemoryStore`], a `DashMap` with absolute per-entry
//! expiry and lazy eviction on read. A relational backend would implement
//! the same trait; the coordinator in [`super::TokenCache`] is agnostic.
//!
//! Store failures are returned, not swallowed: a broken cache invalidates
//! the trust model and must fail the request.

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use super::record::epoch_millis;
use crate::Result;

/// Trait abstracting the persistent cache tier.
///
/// Implementations must be `Send + Sync` because the cache is shared across
/// async tasks.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Look up a value. Returns `None` when the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store a value with a TTL in milliseconds.
    ///
    /// A TTL ≤ 0 is accepted and stores an already-past expiry; the read
    /// path treats such entries as absent.
    async fn set(&self, key: &str, value: Value, ttl_millis: i64) -> Result<()>;

    /// Delete a key. Deleting an absent key is a no-op.
    async fn delete(&self, key: &str) -> Result<()>;
}

struct StoredEntry {
    value: Value,
    /// Absolute expiry, Unix epoch milliseconds
    expires_at: i64,
}

impl StoredEntry {
    fn is_expired(&self) -> bool {
        epoch_millis() >= self.expires_at
    }
}

/// Ephemeral in-process store.
pub struct InMemoryStore {
    entries: DashMap<String, StoredEntry>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };

        if entry.is_expired() {
            drop(entry);
            self.entries.remove(key);
            debug!(key = %key, "Lazy-evicted expired cache entry");
            return Ok(None);
        }

        Ok(Some(entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Value, ttl_millis: i64) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                value,
                expires_at: epoch_millis().saturating_add(ttl_millis),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}
