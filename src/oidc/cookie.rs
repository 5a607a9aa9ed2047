//! Session cookie construction.

use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

/// Name of the session cookie carrying the current access token.
pub const SESSION_COOKIE: &str = "cp-token";

/// Name of the short-lived nonce cookie set for the authorization redirect.
pub const NONCE_COOKIE: &str = "cp-nonce";

/// Create the `cp-token` session cookie.
///
/// HTTP-only, `SameSite=Strict`, scoped to `/`, secure iff the origin
/// scheme is https.
pub fn session_cookie(access_token: &str, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, access_token.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path("/")
        .build()
}

/// Create a removal cookie for `cp-token`.
pub fn clear_session_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .max_age(Duration::ZERO)
        .build()
}

/// Create the nonce cookie accompanying an authorization redirect.
pub fn nonce_cookie(nonce: &str, secure: bool) -> Cookie<'static> {
    Cookie::build((NONCE_COOKIE, nonce.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(Duration::minutes(5))
        .build()
}

/// Create a removal cookie for the nonce.
pub fn clear_nonce_cookie() -> Cookie<'static> {
    Cookie::build((NONCE_COOKIE, ""))
        .path("/")
        .max_age(Duration::ZERO)
        .build()
}
