//! Control-Plane Session Gateway
//!
//! Session token issuance and downstream-JWT exchange for the developer
//! portal.
//!
//! # Features
//!
//! - **OIDC Authenticator**: authorization-code flow against the control
//!   plane, with proxy-host rewriting of discovered endpoints
//! - **Token Cache**: two-tier expiring store with a secondary-key index
//!   for O(1) revocation cascades
//! - **Exchange Middleware**: transparent translation of inbound
//!   credentials into downstream API JWTs
//! - **Backchannel Logout**: provider-initiated session termination

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod error;
pub mod exchange;
pub mod logout;
pub mod oidc;
pub mod server;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
