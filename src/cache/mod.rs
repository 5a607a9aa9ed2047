//! Token cache — two-tier expiring key-value store for session state.
//!
//! # Design
//!
//! Three keyspaces live in one store, distinguished by typed records:
//!
//! - `<access_token>-info` → [`SessionRecord`]  (written by the authenticator)
//! - `<bearer>`            → [`DownstreamJwtRecord`]  (written by the middleware)
//! - `<secondary_key>`     → reverse index to the bearer, for O(1) cascade
//!   deletion on backchannel logout
//!
//! The persistent tier sits behind the [`CacheStore`] trait; an additional
//! in-process `DashMap` mirror short-circuits reads of downstream JWTs.
//! Store errors are fatal to the request — authentication must not proceed
//! on a broken cache.

mod record;
mod store;

pub use record::{
    CacheRecord, DownstreamJwtRecord, SessionRecord, TokenSet, UserInfo, session_key,
};
pub use store::{CacheStore, InMemoryStore};

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::{Error, Result};

/// Two-tier token cache shared by the authenticator, the exchange
/// middleware, and the backchannel logout handler.
pub struct TokenCache {
    /// Persistent tier
    store: Arc<dyn CacheStore>,
    /// In-memory short-circuit tier for downstream JWTs
    memory: DashMap<String, DownstreamJwtRecord>,
}

impl TokenCache {
    /// Create a cache over the given persistent store.
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            memory: DashMap::new(),
        }
    }

    /// Create a cache backed by an ephemeral in-process store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()))
    }

    // ── Session records ──────────────────────────────────────────────────

    /// Look up the session record for an access token.
    ///
    /// A physically present but logically expired record is treated as
    /// absent.
    pub async fn get_session(&self, access_token: &str) -> Result<Option<SessionRecord>> {
        let key = session_key(access_token);
        match self.get_record(&key).await? {
            Some(CacheRecord::Session(record)) if !record.is_expired() => Ok(Some(record)),
            Some(CacheRecord::Session(_)) | None => Ok(None),
            Some(_) => Err(Error::Cache(format!(
                "unexpected record variant under session key {key}"
            ))),
        }
    }

    /// Insert (or replace) the session record for an access token. The TTL
    /// is always `max(0, expires_at - now)`.
    pub async fn put_session(&self, access_token: &str, record: &SessionRecord) -> Result<()> {
        let ttl = record.ttl_millis();
        let value = serde_json::to_value(CacheRecord::Session(record.clone()))?;
        self.store.set(&session_key(access_token), value, ttl).await
    }

    /// Delete the session record for an access token.
    pub async fn delete_session(&self, access_token: &str) -> Result<()> {
        self.store.delete(&session_key(access_token)).await
    }

    // ── Downstream JWT records ───────────────────────────────────────────

    /// Look up the downstream JWT record for a bearer token.
    ///
    /// Checks the in-memory tier first (validity = expiry strictly in the
    /// future), then the persistent tier; persistent hits refresh the
    /// in-memory mirror.
    pub async fn get_downstream(&self, bearer: &str) -> Result<Option<DownstreamJwtRecord>> {
        if let Some(entry) = self.memory.get(bearer) {
            if entry.is_valid() {
                return Ok(Some(entry.clone()));
            }
            drop(entry);
            self.memory.remove(bearer);
        }

        match self.get_record(bearer).await? {
            Some(CacheRecord::DownstreamJwt(record)) if record.is_valid() => {
                self.memory.insert(bearer.to_string(), record.clone());
                Ok(Some(record))
            }
            Some(CacheRecord::DownstreamJwt(_)) | None => Ok(None),
            Some(_) => Err(Error::Cache(format!(
                "unexpected record variant under bearer key {bearer}"
            ))),
        }
    }

    /// Insert a downstream JWT record in both tiers and write the
    /// secondary-key index entry alongside it.
    pub async fn put_downstream(&self, bearer: &str, record: &DownstreamJwtRecord) -> Result<()> {
        let ttl = record.ttl_millis();

        let value = serde_json::to_value(CacheRecord::DownstreamJwt(record.clone()))?;
        self.store.set(bearer, value, ttl).await?;

        if !record.secondary_key.is_empty() {
            let index = serde_json::to_value(CacheRecord::SecondaryIndex {
                bearer: bearer.to_string(),
            })?;
            self.store.set(&record.secondary_key, index, ttl).await?;
        }

        self.memory.insert(bearer.to_string(), record.clone());
        Ok(())
    }

    /// Resolve a secondary key back to its bearer token.
    pub async fn get_secondary(&self, secondary_key: &str) -> Result<Option<String>> {
        match self.get_record(secondary_key).await? {
            Some(CacheRecord::SecondaryIndex { bearer }) => Ok(Some(bearer)),
            None => Ok(None),
            Some(_) => Err(Error::Cache(format!(
                "unexpected record variant under secondary key {secondary_key}"
            ))),
        }
    }

    /// Delete an arbitrary key from the persistent tier.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.store.delete(key).await
    }

    // ── Cascade ──────────────────────────────────────────────────────────

    /// Cascading delete for everything derived from a bearer token: the
    /// secondary-key index entry (when the record carries one), the primary
    /// downstream record, the `-info` session record, and the in-memory
    /// mirror. All four deletes are attempted even when a key is already
    /// absent; the operation is idempotent.
    pub async fn purge_bearer(&self, bearer: &str) -> Result<()> {
        if let Some(CacheRecord::DownstreamJwt(record)) = self.get_record(bearer).await? {
            if !record.secondary_key.is_empty() {
                self.store.delete(&record.secondary_key).await?;
            }
        }

        self.store.delete(bearer).await?;
        self.store.delete(&session_key(bearer)).await?;
        self.memory.remove(bearer);

        debug!(bearer = %bearer, "Purged cache entries for bearer");
        Ok(())
    }

    async fn get_record(&self, key: &str) -> Result<Option<CacheRecord>> {
        let Some(value) = self.store.get(key).await? else {
            return Ok(None);
        };
        let record = serde_json::from_value(value)
            .map_err(|e| Error::Cache(format!("malformed cache record under {key}: {e}")))?;
        Ok(Some(record))
    }

    #[cfg(test)]
    pub(crate) fn memory_len(&self) -> usize {
        self.memory.len()
    }
}
