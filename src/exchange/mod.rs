//! Downstream JWT exchange.
//!
//! Everything between an inbound credential and the `Authorization: Bearer
//! <downstream JWT>` header the protected routes see: credential
//! classification, the IDM exchange client, and the axum middleware that
//! ties them to the token cache.

mod classify;
mod idm;
mod middleware;

pub use classify::{Credential, INTERNAL_TOKEN_TYP, classify};
pub use idm::IdmClient;
pub use middleware::{ExchangeState, OAUTH_HEADER, exchange_middleware};
