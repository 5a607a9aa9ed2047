//! Error types for the session gateway

use std::io;

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for the session gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Session gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider metadata discovery failed
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Authentication failure surfaced to the caller as 401
    #[error("{0}")]
    Authentication(String),

    /// Upstream service (identity provider / IDM) returned a failure
    #[error("Upstream error: HTTP {status} - {body}")]
    Upstream {
        /// HTTP status returned by the upstream service
        status: u16,
        /// Response body, where available
        body: String,
    },

    /// Cache failure. Fatal for the request: authentication must not
    /// proceed on a broken cache.
    #[error("Cache error: {0}")]
    Cache(String),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an authentication error with a caller-visible reason.
    pub fn auth(reason: impl Into<String>) -> Self {
        Self::Authentication(reason.into())
    }

    /// HTTP status this error maps to at the handler boundary.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Authentication(_) | Self::Upstream { .. } | Self::Http(_) => {
                StatusCode::UNAUTHORIZED
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_errors_map_to_401() {
        let err = Error::auth("Access token not found in Cookie");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.to_string(), "Access token not found in Cookie");
    }

    #[test]
    fn cache_errors_map_to_500() {
        let err = Error::Cache("store unavailable".to_string());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn upstream_error_carries_status_and_body() {
        let err = Error::Upstream {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert!(err.to_string().contains("502"));
        assert!(err.to_string().contains("bad gateway"));
    }
}
