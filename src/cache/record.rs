//! Typed cache records.
//!
//! Everything crossing the cache boundary is one of the [`CacheRecord`]
//! variants, validated on read. The tagged enum keeps the keyspaces
//! (session records under `<token>-info`, downstream records under the
//! bearer itself, the reverse index under the secondary key) from being
//! confused with each other.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Current Unix time in seconds.
pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// Current Unix time in milliseconds.
pub(crate) fn epoch_millis() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis();
    i64::try_from(now).unwrap_or(i64::MAX)
}

/// Cache key for the session record belonging to an access token.
#[must_use]
pub fn session_key(access_token: &str) -> String {
    format!("{access_token}-info")
}

/// Token set issued by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenSet {
    /// Access token
    pub access_token: String,
    /// Token type (usually "Bearer")
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Granted scope
    #[serde(default)]
    pub scope: Option<String>,
    /// Absolute expiry (Unix epoch seconds)
    pub expires_at: u64,
    /// ID token (JWT)
    #[serde(default)]
    pub id_token: Option<String>,
    /// Refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenSet {
    /// Seconds until expiry, zero if already past.
    #[must_use]
    pub fn remaining_secs(&self) -> u64 {
        self.expires_at.saturating_sub(epoch_secs())
    }
}

/// Subject claims fetched from the provider's userinfo endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserInfo {
    /// Subject identifier
    pub sub: String,
    /// Email address
    #[serde(default)]
    pub email: Option<String>,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Avatar URL
    #[serde(default)]
    pub picture: Option<String>,
}

/// Session record cached under `<access_token>-info`.
///
/// Its cache TTL always equals `max(0, expires_at - now)`; once the TTL
/// reaches zero the record is logically expired and treated as absent even
/// if the store has not evicted it yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRecord {
    /// Issued tokens and expiry
    pub tokenset: TokenSet,
    /// Subject claims
    pub userinfo: UserInfo,
}

impl SessionRecord {
    /// TTL in milliseconds for (re-)inserting this record.
    #[must_use]
    pub fn ttl_millis(&self) -> i64 {
        i64::try_from(self.tokenset.remaining_secs().saturating_mul(1000)).unwrap_or(i64::MAX)
    }

    /// Logically expired: no time remaining on the token set.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.tokenset.remaining_secs() == 0
    }
}

/// Downstream JWT record cached under the inbound bearer token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownstreamJwtRecord {
    /// The exchanged downstream API token
    pub jwt: String,
    /// Opaque identifier the provider presents in backchannel-logout tokens,
    /// indexed back to the original bearer for cascade deletion
    #[serde(rename = "secondaryKey")]
    pub secondary_key: String,
    /// Absolute expiry (Unix epoch seconds)
    #[serde(rename = "expiryTime")]
    pub expiry_time: u64,
}

impl DownstreamJwtRecord {
    /// Valid only while the expiry timestamp is strictly in the future.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.expiry_time > epoch_secs()
    }

    /// TTL in milliseconds for inserting this record.
    #[must_use]
    pub fn ttl_millis(&self) -> i64 {
        let remaining = i64::try_from(self.expiry_time).unwrap_or(i64::MAX)
            - i64::try_from(epoch_secs()).unwrap_or(0);
        remaining.saturating_mul(1000)
    }
}

/// Tagged cache payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheRecord {
    /// Session record, key `<access_token>-info`
    Session(SessionRecord),
    /// Downstream JWT record, key = bearer token
    DownstreamJwt(DownstreamJwtRecord),
    /// Reverse index, key = secondary key
    SecondaryIndex {
        /// Bearer token the secondary key maps back to
        bearer: String,
    },
}
