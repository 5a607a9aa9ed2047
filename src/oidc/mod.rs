//! OIDC authenticator adapter for the control-plane identity provider.
//!
//! Performs discovery (with proxy-host rewriting), the authorization-code
//! flow, session refresh with a cache short-circuit, and logout with
//! best-effort token revocation. Sessions propagate to the browser through
//! the `cp-token` cookie.

mod authenticator;
mod metadata;

pub mod cookie;

pub use authenticator::{AuthorizationRequest, OidcAuthenticator};
pub use metadata::ProviderMetadata;
