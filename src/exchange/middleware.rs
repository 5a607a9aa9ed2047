//! Downstream JWT exchange middleware.
//!
//! Translates a caller-presented credential into a downstream-service JWT
//! before the request reaches protected routes. Requests without a bearer
//! token pass through unauthenticated; inter-plugin JWTs bypass the
//! exchange entirely.
//!
//! Resolution order for an exchange token: in-memory tier, persistent
//! tier, then a live IDM call that populates both tiers and the
//! secondary-key index. There is no single-flight de-duplication:
//! concurrent misses for the same token may each call the IDM, last writer
//! wins. The exchange is idempotent on the IDM side.

use std::sync::Arc;
use std::sync::LazyLock;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use regex::Regex;
use tracing::{debug, warn};

use super::classify::{Credential, classify};
use super::idm::IdmClient;
use crate::Error;
use crate::cache::TokenCache;
use crate::oidc::cookie::SESSION_COOKIE;

/// Custom header checked before the standard `Authorization` header.
pub const OAUTH_HEADER: &str = "x-tibco-oauth";

static BEARER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^Bearer\s+(\S+)$").expect("valid bearer pattern"));

/// Shared state for the exchange middleware.
pub struct ExchangeState {
    /// Token cache (both tiers)
    pub cache: Arc<TokenCache>,
    /// IDM exchange client
    pub idm: IdmClient,
}

/// Axum middleware translating inbound credentials to downstream JWTs.
pub async fn exchange_middleware(
    State(state): State<Arc<ExchangeState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = extract_bearer(request.headers()) else {
        // No credential at all: pass through unauthenticated
        return next.run(request).await;
    };

    let exchange_key = match classify(&token) {
        Ok(Credential::ExchangeToken(token)) => token,
        Ok(Credential::InternalPlugin) => {
            debug!("Inter-plugin token, bypassing exchange");
            return next.run(request).await;
        }
        Ok(Credential::OpaqueJwt(_)) => {
            let Some(cookie_token) = cookie_token(request.headers()) else {
                return error_response(
                    StatusCode::UNAUTHORIZED,
                    "Access token not found in Cookie",
                );
            };
            cookie_token
        }
        Err(e) => {
            warn!(error = %e, "Bearer token classification failed");
            return error_response(StatusCode::UNAUTHORIZED, &e.to_string());
        }
    };

    match resolve_downstream(&state, &exchange_key).await {
        Ok(jwt) => {
            let value = format!("Bearer {jwt}");
            match HeaderValue::from_str(&value) {
                Ok(header) => {
                    request.headers_mut().insert("authorization", header);
                }
                Err(_) => {
                    return error_response(
                        StatusCode::UNAUTHORIZED,
                        "Error in getting JWT from IDM",
                    );
                }
            }
            next.run(request).await
        }
        Err(e) => {
            warn!(error = %e, "Downstream JWT resolution failed");
            let message = match &e {
                Error::Authentication(reason) => reason.clone(),
                Error::Upstream { status, .. } => {
                    format!("IDM exchange failed: HTTP {status}")
                }
                Error::Http(_) => "Error in getting JWT from IDM".to_string(),
                other => other.to_string(),
            };
            error_response(e.status(), &message)
        }
    }
}

/// Resolve a downstream JWT for the exchange key: cache tiers first, then
/// the IDM, populating the cache on the way back.
async fn resolve_downstream(state: &ExchangeState, key: &str) -> crate::Result<String> {
    if let Some(record) = state.cache.get_downstream(key).await? {
        return Ok(record.jwt);
    }

    let record = state.idm.exchange(key).await?;
    state.cache.put_downstream(key, &record).await?;
    Ok(record.jwt)
}

/// Extract a bearer token from `X-TIBCO-OAUTH` or `Authorization`.
fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(OAUTH_HEADER).and_then(|v| v.to_str().ok()) {
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }

    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| BEARER_PATTERN.captures(v))
        .map(|captures| captures[1].to_string())
}

/// Read the session token from the `cp-token` cookie.
fn cookie_token(headers: &HeaderMap) -> Option<String> {
    let jar = CookieJar::from_headers(headers);
    jar.get(SESSION_COOKIE).map(|c| c.value().to_string())
}

/// Plain-text error response, matching the original's short bodies.
fn error_response(status: StatusCode, message: &str) -> Response {
    (status, message.to_string()).into_response()
}
