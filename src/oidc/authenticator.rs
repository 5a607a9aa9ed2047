//! OIDC authenticator — authorization-code flow against the control plane.
//!
//! # Flow
//!
//! 1. `start` builds the authorization redirect URL (random nonce, `prompt`
//!    rules from config).
//! 2. `authenticate` exchanges the code at the token endpoint, verifies the
//!    ID token against the provider JWKS, fetches userinfo, and caches the
//!    session record under `<access_token>-info`.
//! 3. `refresh` returns the cached record directly while more than five
//!    minutes remain on it; otherwise it runs the refresh grant and
//!    replaces the record.
//! 4. `logout` purges the cache and revokes the access token when the
//!    provider exposes a revocation endpoint.
//!
//! All provider calls go through an HTTP client with the configured
//! timeout and through the proxy-rewritten endpoints from discovery.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{
    Algorithm, DecodingKey, Validation,
    jwk::{AlgorithmParameters, JwkSet},
};
use parking_lot::RwLock;
use rand::RngExt;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::metadata::ProviderMetadata;
use crate::cache::{SessionRecord, TokenCache, TokenSet, UserInfo};
use crate::config::{OidcConfig, PortalEnv, TokenEndpointAuthMethod};
use crate::{Error, Result};

/// Scopes requested for every authorization. Fixed by the provider
/// integration; the legacy per-deployment `scope` key is rejected in config.
const DEFAULT_SCOPE: &str = "openid profile email";

/// Sessions with more than this many seconds remaining are returned from
/// cache without contacting the provider.
const REFRESH_SKEW_SECS: u64 = 300;

/// A prepared authorization redirect.
#[derive(Debug)]
pub struct AuthorizationRequest {
    /// Full authorization URL to redirect the browser to
    pub url: String,
    /// Nonce embedded in the request, to be verified against the ID token
    pub nonce: String,
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: Option<String>,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
    id_token: Option<String>,
    scope: Option<String>,
}

/// ID-token claims we validate beyond the signature
#[derive(Debug, Deserialize)]
struct IdClaims {
    #[serde(default)]
    nonce: Option<String>,
}

/// OIDC authenticator bound to one provider.
pub struct OidcAuthenticator {
    http: reqwest::Client,
    config: OidcConfig,
    metadata: ProviderMetadata,
    cache: Arc<TokenCache>,
    jwks: RwLock<Option<JwkSet>>,
}

impl OidcAuthenticator {
    /// Construct from already-discovered provider metadata.
    pub fn new(
        config: OidcConfig,
        metadata: ProviderMetadata,
        cache: Arc<TokenCache>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            config,
            metadata,
            cache,
            jwks: RwLock::new(None),
        })
    }

    /// Discover provider metadata and construct the authenticator.
    pub async fn discover(
        config: OidcConfig,
        env: &PortalEnv,
        cache: Arc<TokenCache>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        let metadata = ProviderMetadata::discover(&http, &config.metadata_url, env).await?;
        info!(issuer = %metadata.issuer, "OIDC provider discovered");

        Ok(Self {
            http,
            config,
            metadata,
            cache,
            jwks: RwLock::new(None),
        })
    }

    /// Provider metadata (host-rewritten).
    #[must_use]
    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    /// Build the authorization redirect URL.
    pub fn start(&self, state: &str) -> Result<AuthorizationRequest> {
        let nonce = random_token();
        let callback_url = self.callback_url()?;

        let mut url = Url::parse(&self.metadata.authorization_endpoint)
            .map_err(|e| Error::Discovery(format!("invalid authorization endpoint: {e}")))?;

        {
            let mut params = url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &self.config.client_id);
            params.append_pair("redirect_uri", &callback_url);
            params.append_pair("scope", DEFAULT_SCOPE);
            params.append_pair("state", state);
            params.append_pair("nonce", &nonce);

            // `auto` means "let the provider decide": no prompt parameter
            if self.config.prompt != "auto" {
                params.append_pair("prompt", &self.config.prompt);
            }
        }

        Ok(AuthorizationRequest {
            url: url.to_string(),
            nonce,
        })
    }

    /// Exchange an authorization code for a session record and cache it.
    pub async fn authenticate(
        &self,
        code: &str,
        expected_nonce: Option<&str>,
    ) -> Result<SessionRecord> {
        let userinfo_endpoint = self
            .metadata
            .userinfo_endpoint
            .clone()
            .ok_or_else(|| {
                Error::Discovery("provider metadata has no userinfo_endpoint".to_string())
            })?;

        let callback_url = self.callback_url()?;
        let response = self
            .token_request(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", &callback_url),
            ])
            .await?;

        if let Some(ref id_token) = response.id_token {
            self.verify_id_token(id_token, expected_nonce).await?;
        }

        let userinfo = self.fetch_userinfo(&userinfo_endpoint, &response.access_token).await?;
        let record = session_record(response, userinfo);

        self.cache
            .put_session(&record.tokenset.access_token, &record)
            .await?;

        info!(sub = %record.userinfo.sub, "Session established");
        Ok(record)
    }

    /// Refresh the session for the current cookie token.
    ///
    /// Short-circuit: a cached record with more than five minutes remaining
    /// is returned as-is, with no provider call. Otherwise the refresh
    /// grant runs, the old record is dropped, and a new one is cached.
    pub async fn refresh(&self, cookie_token: Option<&str>) -> Result<SessionRecord> {
        let cached = match cookie_token {
            Some(token) => self.cache.get_session(token).await?,
            None => None,
        };

        if let Some(ref record) = cached {
            if record.tokenset.remaining_secs() > REFRESH_SKEW_SECS {
                debug!(sub = %record.userinfo.sub, "Refresh short-circuit from cache");
                return Ok(record.clone());
            }
        }

        let refresh_token = cached
            .as_ref()
            .and_then(|r| r.tokenset.refresh_token.clone())
            .ok_or_else(|| Error::auth("Refresh failed"))?;

        let userinfo_endpoint = self
            .metadata
            .userinfo_endpoint
            .clone()
            .ok_or_else(|| {
                Error::Discovery("provider metadata has no userinfo_endpoint".to_string())
            })?;

        let response = self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", &refresh_token),
            ])
            .await?;

        let userinfo = self.fetch_userinfo(&userinfo_endpoint, &response.access_token).await?;

        if let Some(old_token) = cookie_token {
            self.cache.delete_session(old_token).await?;
        }

        let record = session_record(response, userinfo);
        self.cache
            .put_session(&record.tokenset.access_token, &record)
            .await?;

        info!(sub = %record.userinfo.sub, "Session refreshed");
        Ok(record)
    }

    /// Terminate the session for an access token.
    pub async fn logout(&self, access_token: &str) -> Result<()> {
        self.cache.purge_bearer(access_token).await?;

        if let Some(ref revocation_endpoint) = self.metadata.revocation_endpoint {
            // Best-effort: a failed revocation must not block local logout
            let mut params = vec![
                ("token", access_token.to_string()),
                ("token_type_hint", "access_token".to_string()),
            ];
            let request = self.with_client_auth(self.http.post(revocation_endpoint), &mut params);
            match request.form(&params).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Access token revoked");
                }
                Ok(response) => {
                    warn!(status = %response.status(), "Token revocation rejected");
                }
                Err(e) => {
                    warn!(error = %e, "Token revocation failed");
                }
            }
        }

        Ok(())
    }

    // ── Provider calls ───────────────────────────────────────────────────

    async fn token_request(&self, grant: &[(&str, &str)]) -> Result<TokenResponse> {
        let mut params: Vec<(&str, String)> = grant
            .iter()
            .map(|(k, v)| (*k, (*v).to_string()))
            .collect();

        let request = self.with_client_auth(self.http.post(&self.metadata.token_endpoint), &mut params);
        let response = request.form(&params).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(status = status, body = %body, "Token endpoint call failed");
            return Err(Error::Upstream { status, body });
        }

        Ok(response.json().await?)
    }

    /// Apply the configured token-endpoint auth method to a request.
    fn with_client_auth(
        &self,
        request: reqwest::RequestBuilder,
        params: &mut Vec<(&str, String)>,
    ) -> reqwest::RequestBuilder {
        match self.config.token_endpoint_auth_method {
            TokenEndpointAuthMethod::ClientSecretBasic => request.basic_auth(
                &self.config.client_id,
                Some(&self.config.client_secret),
            ),
            TokenEndpointAuthMethod::ClientSecretPost => {
                params.push(("client_id", self.config.client_id.clone()));
                params.push(("client_secret", self.config.client_secret.clone()));
                request
            }
        }
    }

    async fn fetch_userinfo(&self, endpoint: &str, access_token: &str) -> Result<UserInfo> {
        let response = self
            .http
            .get(endpoint)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(status = status, body = %body, "Userinfo call failed");
            return Err(Error::Upstream { status, body });
        }

        Ok(response.json().await?)
    }

    // ── ID-token verification ────────────────────────────────────────────

    async fn verify_id_token(&self, token: &str, expected_nonce: Option<&str>) -> Result<()> {
        let alg: Algorithm = self
            .config
            .token_signed_response_alg
            .parse()
            .map_err(|_| {
                Error::Config(format!(
                    "unsupported token_signed_response_alg: {}",
                    self.config.token_signed_response_alg
                ))
            })?;

        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| Error::auth(format!("Unable to decode ID token: {e}")))?;
        let kid = header
            .kid
            .ok_or_else(|| Error::auth("ID token header has no kid"))?;

        let key = self.find_decoding_key(&kid).await?;

        let mut validation = Validation::new(alg);
        validation.leeway = 60;
        validation.set_audience(&[&self.config.client_id]);

        let data = jsonwebtoken::decode::<IdClaims>(token, &key, &validation)
            .map_err(|e| Error::auth(format!("ID token verification failed: {e}")))?;

        if let Some(expected) = expected_nonce {
            if data.claims.nonce.as_deref() != Some(expected) {
                return Err(Error::auth("ID token nonce mismatch"));
            }
        }

        Ok(())
    }

    /// Find a decoding key by `kid`, refreshing the JWKS once if not found.
    async fn find_decoding_key(&self, kid: &str) -> Result<DecodingKey> {
        if let Some(ref jwks) = *self.jwks.read() {
            if let Some(key) = find_key_in_jwks(jwks, kid) {
                return Ok(key);
            }
        }

        debug!(kid = %kid, "Key not cached, fetching JWKS");
        let jwks: JwkSet = self
            .http
            .get(&self.metadata.jwks_uri)
            .send()
            .await?
            .json()
            .await?;

        let key = find_key_in_jwks(&jwks, kid);
        *self.jwks.write() = Some(jwks);

        key.ok_or_else(|| Error::auth(format!("Unknown key ID: {kid}")))
    }

    fn callback_url(&self) -> Result<String> {
        self.config
            .callback_url
            .clone()
            .ok_or_else(|| Error::Config("oidc.callback_url is not configured".to_string()))
    }
}

/// Build a session record from a token response and userinfo claims.
fn session_record(response: TokenResponse, userinfo: UserInfo) -> SessionRecord {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();

    SessionRecord {
        tokenset: TokenSet {
            access_token: response.access_token,
            token_type: response.token_type.unwrap_or_else(|| "Bearer".to_string()),
            scope: response.scope,
            expires_at: now + response.expires_in.unwrap_or(3600),
            id_token: response.id_token,
            refresh_token: response.refresh_token,
        },
        userinfo,
    }
}

/// Find a JWK by `kid` and convert it to a `DecodingKey`.
fn find_key_in_jwks(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    for jwk in &jwks.keys {
        if jwk.common.key_id.as_deref() != Some(kid) {
            continue;
        }
        return match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
            AlgorithmParameters::EllipticCurve(ec) => {
                DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
            }
            AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => None,
        };
    }
    None
}

/// 16 random bytes, URL-safe base64.
fn random_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortalEnv;
    use serde_json::json;

    fn env() -> PortalEnv {
        PortalEnv {
            cp_url: "https://cp.example.com".to_string(),
            cp_domain: "http://127.0.0.1:1".to_string(),
        }
    }

    fn config(prompt: &str) -> OidcConfig {
        OidcConfig {
            client_id: "portal".to_string(),
            client_secret: "s3cret".to_string(),
            metadata_url: "https://cp.example.com/.well-known/openid-configuration".to_string(),
            callback_url: Some("https://portal.example.com/api/auth/callback".to_string()),
            prompt: prompt.to_string(),
            ..OidcConfig::default()
        }
    }

    /// Metadata whose endpoints point at a closed local port, so any
    /// accidental provider call fails loudly.
    fn unroutable_metadata() -> ProviderMetadata {
        ProviderMetadata::from_document(
            json!({
                "issuer": "https://cp.example.com",
                "authorization_endpoint": "https://cp.example.com/oauth2/authorize",
                "token_endpoint": "https://cp.example.com/oauth2/token",
                "userinfo_endpoint": "https://cp.example.com/oauth2/userinfo",
                "jwks_uri": "https://cp.example.com/oauth2/jwks"
            }),
            &env(),
        )
        .unwrap()
    }

    fn authenticator(prompt: &str) -> OidcAuthenticator {
        OidcAuthenticator::new(
            config(prompt),
            unroutable_metadata(),
            Arc::new(TokenCache::in_memory()),
        )
        .unwrap()
    }

    fn cached_session(remaining_secs: i64) -> SessionRecord {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let expires_at = if remaining_secs >= 0 {
            now + u64::try_from(remaining_secs).unwrap()
        } else {
            now.saturating_sub(u64::try_from(-remaining_secs).unwrap())
        };

        SessionRecord {
            tokenset: TokenSet {
                access_token: "tok-123".to_string(),
                token_type: "Bearer".to_string(),
                scope: None,
                expires_at,
                id_token: None,
                refresh_token: Some("refresh-1".to_string()),
            },
            userinfo: UserInfo {
                sub: "user-1".to_string(),
                email: Some("alice@example.com".to_string()),
                name: None,
                picture: None,
            },
        }
    }

    #[test]
    fn start_builds_authorization_url_with_nonce_and_prompt() {
        let auth = authenticator("none");
        let request = auth.start("state-1").unwrap();

        let url = Url::parse(&request.url).unwrap();
        let params: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        assert!(params.contains(&("response_type".to_string(), "code".to_string())));
        assert!(params.contains(&("client_id".to_string(), "portal".to_string())));
        assert!(params.contains(&("prompt".to_string(), "none".to_string())));
        assert!(params.contains(&("nonce".to_string(), request.nonce.clone())));
        // 16 random bytes -> 22 base64url chars
        assert!(request.nonce.len() >= 20);
    }

    #[test]
    fn prompt_auto_suppresses_the_parameter() {
        let auth = authenticator("auto");
        let request = auth.start("state-1").unwrap();

        let url = Url::parse(&request.url).unwrap();
        assert!(url.query_pairs().all(|(k, _)| k != "prompt"));
    }

    #[test]
    fn start_nonces_are_unique() {
        let auth = authenticator("none");
        let a = auth.start("s").unwrap();
        let b = auth.start("s").unwrap();
        assert_ne!(a.nonce, b.nonce);
    }

    #[tokio::test]
    async fn refresh_short_circuits_without_provider_call() {
        let cache = Arc::new(TokenCache::in_memory());
        let auth = OidcAuthenticator::new(
            config("none"),
            unroutable_metadata(),
            Arc::clone(&cache),
        )
        .unwrap();

        let record = cached_session(3600);
        cache.put_session("tok-123", &record).await.unwrap();

        // The token endpoint is unroutable, so success proves no call
        let refreshed = auth.refresh(Some("tok-123")).await.unwrap();
        assert_eq!(refreshed, record);
        assert!(refreshed.tokenset.remaining_secs() > REFRESH_SKEW_SECS);
    }

    #[tokio::test]
    async fn refresh_without_cached_record_fails() {
        let auth = authenticator("none");
        let err = auth.refresh(Some("tok-unknown")).await.unwrap_err();
        assert_eq!(err.to_string(), "Refresh failed");
    }

    #[tokio::test]
    async fn refresh_without_cookie_fails() {
        let auth = authenticator("none");
        let err = auth.refresh(None).await.unwrap_err();
        assert_eq!(err.to_string(), "Refresh failed");
    }

    #[tokio::test]
    async fn authenticate_requires_userinfo_endpoint() {
        let mut metadata = unroutable_metadata();
        metadata.userinfo_endpoint = None;
        let auth = OidcAuthenticator::new(
            config("none"),
            metadata,
            Arc::new(TokenCache::in_memory()),
        )
        .unwrap();

        let err = auth.authenticate("code", None).await.unwrap_err();
        assert!(err.to_string().contains("userinfo_endpoint"));
    }

    #[tokio::test]
    async fn logout_purges_cached_session() {
        let cache = Arc::new(TokenCache::in_memory());
        let auth = OidcAuthenticator::new(
            config("none"),
            unroutable_metadata(),
            Arc::clone(&cache),
        )
        .unwrap();

        cache
            .put_session("tok-123", &cached_session(3600))
            .await
            .unwrap();

        // No revocation endpoint in this metadata, so logout is local-only
        auth.logout("tok-123").await.unwrap();
        assert_eq!(cache.get_session("tok-123").await.unwrap(), None);
    }
}
