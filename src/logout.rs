//! Backchannel logout.
//!
//! The identity provider posts a logout token naming the secondary keys of
//! sessions it has terminated; every derived cache entry is cascaded away.
//!
//! The logout token is decoded **without signature verification**: trust is
//! established by the transport boundary in front of this route. Verifying
//! against the provider JWKS would be a one-call change here if that
//! assumption changes.

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Deserialize;
use tracing::{error, info};

use crate::cache::TokenCache;
use crate::{Error, Result};

/// `POST /api/oidc/backchannel-logout` request body.
#[derive(Debug, Deserialize)]
pub struct BackchannelLogoutRequest {
    /// The provider's logout token (JWT)
    pub logout_token: String,
}

#[derive(Debug, Deserialize)]
struct LogoutClaims {
    #[serde(rename = "secondaryKeys")]
    secondary_keys: Vec<String>,
}

/// `POST /api/oidc/backchannel-logout` — cascade-delete the sessions named
/// by the logout token's secondary keys.
pub async fn backchannel_logout(
    State(cache): State<Arc<TokenCache>>,
    Json(request): Json<BackchannelLogoutRequest>,
) -> Response {
    match process_logout(&cache, &request.logout_token).await {
        Ok(purged) => {
            info!(sessions = purged, "Backchannel logout processed");
            (StatusCode::OK, "OK").into_response()
        }
        Err(e) => {
            error!(error = %e, "Backchannel logout failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Resolve each secondary key and purge everything derived from it. The
/// key itself is deleted even when it maps to nothing. Returns the number
/// of sessions actually purged.
async fn process_logout(cache: &TokenCache, logout_token: &str) -> Result<usize> {
    let claims = decode_logout_claims(logout_token)?;

    let mut purged = 0;
    for key in &claims.secondary_keys {
        if let Some(bearer) = cache.get_secondary(key).await? {
            cache.purge_bearer(&bearer).await?;
            purged += 1;
        }
        cache.delete(key).await?;
    }

    Ok(purged)
}

/// Decode the logout token's payload segment. No signature check.
fn decode_logout_claims(token: &str) -> Result<LogoutClaims> {
    let payload_segment = token
        .split('.')
        .nth(1)
        .ok_or_else(|| Error::Internal("malformed logout_token: not a JWT".to_string()))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload_segment)
        .map_err(|e| Error::Internal(format!("malformed logout_token: {e}")))?;

    serde_json::from_slice(&bytes).map_err(|e| {
        Error::Internal(format!("malformed logout_token: {e}"))
    })
}
