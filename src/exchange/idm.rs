//! IDM token exchange client.

use serde_json::json;
use tracing::{debug, warn};

use crate::cache::DownstreamJwtRecord;
use crate::config::IdmConfig;
use crate::{Error, Result};

/// Client for the Identity Management JWT exchange endpoint.
pub struct IdmClient {
    http: reqwest::Client,
    config: IdmConfig,
}

impl IdmClient {
    /// Create an exchange client.
    ///
    /// No explicit timeout is set on this client; IDM calls ride on
    /// reqwest's defaults, unlike the identity-provider client.
    pub fn new(config: IdmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    /// Exchange a control-plane token for a downstream JWT.
    ///
    /// The response must carry `jwt`, `secondaryKey`, and `expiryTime`;
    /// anything else fails with the generic exchange reason.
    pub async fn exchange(&self, token: &str) -> Result<DownstreamJwtRecord> {
        debug!(endpoint = %self.config.jwt_api_path, "Exchanging token with IDM");

        let response = self
            .http
            .post(&self.config.jwt_api_path)
            .bearer_auth(token)
            .json(&json!({
                "token": token,
                "tenant_id": self.config.tenant_id,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(status = status, body = %body, "IDM exchange failed");
            return Err(Error::Upstream { status, body });
        }

        response
            .json::<DownstreamJwtRecord>()
            .await
            .map_err(|e| {
                warn!(error = %e, "IDM response missing required fields");
                Error::auth("Error in getting JWT from IDM")
            })
    }
}
