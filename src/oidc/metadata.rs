//! Provider metadata discovery.
//!
//! The discovery document advertises endpoints under the control plane's
//! public host, which is not routable from the backend network. Every
//! discovered endpoint URL is therefore rewritten to the internal proxy
//! host before use. The document itself is kept verbatim so the well-known
//! route can serve it unmodified to browsers.

use serde_json::Value;
use tracing::debug;

use crate::config::PortalEnv;
use crate::{Error, Result};

/// Discovered (and host-rewritten) OIDC provider metadata.
#[derive(Debug, Clone)]
pub struct ProviderMetadata {
    /// Issuer identifier
    pub issuer: String,
    /// Authorization endpoint
    pub authorization_endpoint: String,
    /// Token endpoint
    pub token_endpoint: String,
    /// Userinfo endpoint. Its absence only fails at authenticate time.
    pub userinfo_endpoint: Option<String>,
    /// JWKS document URI
    pub jwks_uri: String,
    /// Token revocation endpoint, when the provider exposes one
    pub revocation_endpoint: Option<String>,
    /// The discovery document as fetched, with public endpoint URLs
    pub document: Value,
}

impl ProviderMetadata {
    /// Fetch the discovery document and rewrite its endpoints to the
    /// internal proxy host.
    pub async fn discover(
        http: &reqwest::Client,
        metadata_url: &str,
        env: &PortalEnv,
    ) -> Result<Self> {
        debug!(url = %metadata_url, "Fetching provider metadata");
        let response = http.get(metadata_url).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Discovery(format!(
                "metadata fetch failed: HTTP {status} - {body}"
            )));
        }

        let document: Value = response.json().await?;
        Self::from_document(document, env)
    }

    /// Build metadata from an already-fetched discovery document.
    pub fn from_document(document: Value, env: &PortalEnv) -> Result<Self> {
        let required = |field: &str| -> Result<String> {
            document
                .get(field)
                .and_then(Value::as_str)
                .map(|url| proxy_rewrite(url, env))
                .ok_or_else(|| Error::Discovery(format!("metadata is missing '{field}'")))
        };
        let optional = |field: &str| -> Option<String> {
            document
                .get(field)
                .and_then(Value::as_str)
                .map(|url| proxy_rewrite(url, env))
        };

        Ok(Self {
            issuer: required("issuer")?,
            authorization_endpoint: required("authorization_endpoint")?,
            token_endpoint: required("token_endpoint")?,
            userinfo_endpoint: optional("userinfo_endpoint"),
            jwks_uri: required("jwks_uri")?,
            revocation_endpoint: optional("revocation_endpoint"),
            document,
        })
    }
}

/// Substitute the public control-plane host with the internal proxy host.
fn proxy_rewrite(url: &str, env: &PortalEnv) -> String {
    url.replacen(&env.cp_url, &env.cp_domain, 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env() -> PortalEnv {
        PortalEnv {
            cp_url: "https://cp.example.com".to_string(),
            cp_domain: "http://cp-proxy.internal:8080".to_string(),
        }
    }

    fn document() -> Value {
        json!({
            "issuer": "https://cp.example.com",
            "authorization_endpoint": "https://cp.example.com/oauth2/authorize",
            "token_endpoint": "https://cp.example.com/oauth2/token",
            "userinfo_endpoint": "https://cp.example.com/oauth2/userinfo",
            "jwks_uri": "https://cp.example.com/oauth2/jwks",
            "revocation_endpoint": "https://cp.example.com/oauth2/revoke"
        })
    }

    #[test]
    fn endpoints_are_rewritten_to_proxy_host() {
        let meta = ProviderMetadata::from_document(document(), &env()).unwrap();

        assert_eq!(
            meta.token_endpoint,
            "http://cp-proxy.internal:8080/oauth2/token"
        );
        assert_eq!(
            meta.userinfo_endpoint.as_deref(),
            Some("http://cp-proxy.internal:8080/oauth2/userinfo")
        );
        assert_eq!(
            meta.revocation_endpoint.as_deref(),
            Some("http://cp-proxy.internal:8080/oauth2/revoke")
        );
    }

    #[test]
    fn document_is_kept_verbatim() {
        let meta = ProviderMetadata::from_document(document(), &env()).unwrap();

        // Browsers must see the public URLs, not the proxy ones
        assert_eq!(
            meta.document["token_endpoint"],
            "https://cp.example.com/oauth2/token"
        );
    }

    #[test]
    fn missing_userinfo_endpoint_is_tolerated_at_discovery() {
        let mut doc = document();
        doc.as_object_mut().unwrap().remove("userinfo_endpoint");

        let meta = ProviderMetadata::from_document(doc, &env()).unwrap();
        assert!(meta.userinfo_endpoint.is_none());
    }

    #[test]
    fn missing_token_endpoint_fails_discovery() {
        let mut doc = document();
        doc.as_object_mut().unwrap().remove("token_endpoint");

        let err = ProviderMetadata::from_document(doc, &env()).unwrap_err();
        assert!(err.to_string().contains("token_endpoint"));
    }

    #[test]
    fn foreign_hosts_are_left_alone() {
        assert_eq!(
            proxy_rewrite("https://other.example.org/jwks", &env()),
            "https://other.example.org/jwks"
        );
    }
}
