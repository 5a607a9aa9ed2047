//! Credential classification.
//!
//! Three kinds of credential arrive on the same headers. Classification is
//! a single closed enumeration instead of pattern checks scattered through
//! the middleware:
//!
//! - [`Credential::ExchangeToken`] — an opaque control-plane token
//!   (`CIC~` + 24 URL-safe base64 chars) that must be exchanged with the
//!   IDM for a downstream JWT.
//! - [`Credential::InternalPlugin`] — a service-to-service JWT whose header
//!   `typ` carries the inter-plugin sentinel; bypasses the exchange.
//! - [`Credential::OpaqueJwt`] — anything else that decodes as a JWT; the
//!   session cookie is consulted for the real exchange token.

use std::sync::LazyLock;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use regex::Regex;
use serde::Deserialize;

use crate::{Error, Result};

/// `typ` header value marking trusted inter-plugin calls.
pub const INTERNAL_TOKEN_TYP: &str = "vnd.backstage.plugin";

static CIC_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^CIC~[A-Za-z0-9_-]{24}$").expect("valid CIC pattern"));

/// Classified inbound credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Trusted inter-plugin JWT; no exchange, no header rewrite
    InternalPlugin,
    /// Control-plane token to exchange with the IDM
    ExchangeToken(String),
    /// Some other JWT; the session cookie holds the exchange token
    OpaqueJwt(String),
}

#[derive(Debug, Deserialize)]
struct JwtHeader {
    #[serde(default)]
    typ: Option<String>,
}

/// Classify a bearer token.
///
/// Tokens that are neither `CIC~`-shaped nor decodable as a JWT fail with
/// the caller-visible reason `"Unable to decode JWT token"`.
pub fn classify(token: &str) -> Result<Credential> {
    if CIC_PATTERN.is_match(token) {
        return Ok(Credential::ExchangeToken(token.to_string()));
    }

    let header = decode_jwt_header(token)?;
    if header.typ.as_deref() == Some(INTERNAL_TOKEN_TYP) {
        return Ok(Credential::InternalPlugin);
    }

    Ok(Credential::OpaqueJwt(token.to_string()))
}

/// Decode the header segment of a JWT without verification.
fn decode_jwt_header(token: &str) -> Result<JwtHeader> {
    let header_segment = token
        .split('.')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::auth("Unable to decode JWT token"))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(header_segment)
        .map_err(|_| Error::auth("Unable to decode JWT token"))?;

    serde_json::from_slice(&bytes).map_err(|_| Error::auth("Unable to decode JWT token"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn jwt_with_typ(typ: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&json!({"alg": "RS256", "typ": typ})).unwrap(),
        );
        let payload = URL_SAFE_NO_PAD.encode(b"{}");
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn cic_token_classifies_as_exchange() {
        let token = "CIC~AbCdEfGhIjKlMnOpQrStUvWx";
        assert_eq!(
            classify(token).unwrap(),
            Credential::ExchangeToken(token.to_string())
        );
    }

    #[test]
    fn cic_pattern_requires_exactly_24_chars() {
        assert!(classify("CIC~short").is_err()); // not a JWT either
        // 25 chars after the prefix: falls through to JWT decoding, fails
        assert!(classify("CIC~AbCdEfGhIjKlMnOpQrStUvWxY").is_err());
    }

    #[test]
    fn internal_typ_classifies_as_plugin_token() {
        let token = jwt_with_typ(INTERNAL_TOKEN_TYP);
        assert_eq!(classify(&token).unwrap(), Credential::InternalPlugin);
    }

    #[test]
    fn ordinary_jwt_classifies_as_opaque() {
        let token = jwt_with_typ("JWT");
        assert_eq!(
            classify(&token).unwrap(),
            Credential::OpaqueJwt(token.clone())
        );
    }

    #[test]
    fn undecodable_token_fails_with_decode_reason() {
        let err = classify("not-a-jwt-at-all").unwrap_err();
        assert_eq!(err.to_string(), "Unable to decode JWT token");
    }

    #[test]
    fn jwt_without_typ_is_opaque() {
        let header = URL_SAFE_NO_PAD
            .encode(serde_json::to_vec(&json!({"alg": "RS256"})).unwrap());
        let token = format!("{header}.e30.sig");
        assert!(matches!(
            classify(&token).unwrap(),
            Credential::OpaqueJwt(_)
        ));
    }
}
