//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// OIDC provider configuration
    pub oidc: OidcConfig,
    /// IDM token exchange configuration
    pub idm: IdmConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7007,
        }
    }
}

/// Token endpoint client authentication method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TokenEndpointAuthMethod {
    /// Credentials in the `Authorization: Basic` header (RFC 6749 §2.3.1)
    #[default]
    ClientSecretBasic,
    /// Credentials in the form body
    ClientSecretPost,
}

/// OIDC provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcConfig {
    /// OAuth client ID
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
    /// Provider metadata document URL (`.well-known/openid-configuration`)
    pub metadata_url: String,
    /// Redirect URI for the authorization-code callback. Derived from the
    /// server address when unset.
    pub callback_url: Option<String>,
    /// How the client authenticates at the token endpoint
    pub token_endpoint_auth_method: TokenEndpointAuthMethod,
    /// Expected ID-token signing algorithm
    pub token_signed_response_alg: String,
    /// `prompt` parameter for the authorization request. The special value
    /// `auto` suppresses the parameter entirely.
    pub prompt: String,
    /// Timeout for identity-provider HTTP calls
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Legacy key, rejected at validation. Scopes are fixed by the provider
    /// integration and must not be overridden per deployment.
    pub scope: Option<String>,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            metadata_url: String::new(),
            callback_url: None,
            token_endpoint_auth_method: TokenEndpointAuthMethod::default(),
            token_signed_response_alg: "RS256".to_string(),
            prompt: "none".to_string(),
            timeout: Duration::from_secs(10),
            scope: None,
        }
    }
}

/// IDM token exchange configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdmConfig {
    /// Full URL of the IDM JWT exchange endpoint
    pub jwt_api_path: String,
    /// Tenant identifier sent with every exchange request
    pub tenant_id: String,
}

impl Default for IdmConfig {
    fn default() -> Self {
        Self {
            jwt_api_path: String::new(),
            tenant_id: "TSC".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from an optional YAML file merged with
    /// `CP_GATEWAY_`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("CP_GATEWAY_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration, failing fast on anything that would
    /// produce a broken authenticator at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.oidc.scope.is_some() {
            return Err(Error::Config(
                "The 'oidc.scope' key is no longer supported; scopes are \
                 negotiated with the provider and must not be configured"
                    .to_string(),
            ));
        }

        if self.oidc.client_id.is_empty() {
            return Err(Error::Config("oidc.client_id must be set".to_string()));
        }
        if self.oidc.client_secret.is_empty() {
            return Err(Error::Config("oidc.client_secret must be set".to_string()));
        }
        if self.oidc.metadata_url.is_empty() {
            return Err(Error::Config("oidc.metadata_url must be set".to_string()));
        }

        Ok(())
    }
}

/// Required control-plane environment.
///
/// `CP_URL` is the public host of the identity/control plane; discovery
/// documents expose endpoints under it. `CP_DOMAIN` is the internal proxy
/// host those endpoints are actually reachable through from this network.
#[derive(Debug, Clone)]
pub struct PortalEnv {
    /// Public control-plane base URL
    pub cp_url: String,
    /// Internal proxy base URL
    pub cp_domain: String,
}

impl PortalEnv {
    /// Read `CP_URL` and `CP_DOMAIN` from the process environment.
    ///
    /// Both are required; either missing is an error. Callers that can run
    /// degraded (the route registrar) log and skip instead of propagating.
    pub fn from_env() -> Result<Self> {
        let cp_url = env::var("CP_URL")
            .map_err(|_| Error::Config("CP_URL environment variable is not set".to_string()))?;
        let cp_domain = env::var("CP_DOMAIN")
            .map_err(|_| Error::Config("CP_DOMAIN environment variable is not set".to_string()))?;

        Ok(Self {
            cp_url: cp_url.trim_end_matches('/').to_string(),
            cp_domain: cp_domain.trim_end_matches('/').to_string(),
        })
    }
}
