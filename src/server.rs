//! Gateway server — router assembly and session endpoints.
//!
//! The OIDC-dependent routes (session flow, well-known proxy, backchannel
//! logout) activate only when `CP_URL`/`CP_DOMAIN` are present; without
//! them the server still runs with `/health` and the exchange middleware,
//! and logs an error instead of crashing.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::cache::{InMemoryStore, SessionRecord, TokenCache};
use crate::config::{Config, PortalEnv};
use crate::exchange::{ExchangeState, IdmClient, exchange_middleware};
use crate::logout::backchannel_logout;
use crate::oidc::{
    OidcAuthenticator,
    cookie::{NONCE_COOKIE, SESSION_COOKIE, clear_nonce_cookie, clear_session_cookie,
             nonce_cookie, session_cookie},
};
use crate::{Error, Result};

/// Shared state for the session-flow handlers.
pub struct AuthState {
    /// OIDC authenticator
    pub authenticator: Arc<OidcAuthenticator>,
    /// Token cache
    pub cache: Arc<TokenCache>,
    /// Whether cookies are marked `Secure` (https origin)
    pub secure_cookies: bool,
}

/// The session gateway server.
pub struct Gateway {
    config: Config,
    cache: Arc<TokenCache>,
}

impl Gateway {
    /// Create a gateway over an ephemeral in-process cache store.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cache: Arc::new(TokenCache::new(Arc::new(InMemoryStore::new()))),
        }
    }

    /// Build the router. OIDC routes are gated on the control-plane
    /// environment being present.
    pub async fn build_router(&self) -> Result<Router> {
        let exchange_state = Arc::new(ExchangeState {
            cache: Arc::clone(&self.cache),
            idm: IdmClient::new(self.config.idm.clone())?,
        });

        let mut app = Router::new().route("/health", get(health_handler));

        match PortalEnv::from_env() {
            Ok(env) => {
                let authenticator = Arc::new(
                    OidcAuthenticator::discover(
                        self.config.oidc.clone(),
                        &env,
                        Arc::clone(&self.cache),
                    )
                    .await?,
                );

                let secure_cookies = self
                    .config
                    .oidc
                    .callback_url
                    .as_deref()
                    .is_some_and(|url| url.starts_with("https://"));

                let auth_state = Arc::new(AuthState {
                    authenticator: Arc::clone(&authenticator),
                    cache: Arc::clone(&self.cache),
                    secure_cookies,
                });

                let session_routes = Router::new()
                    .route("/api/auth/start", get(auth_start_handler))
                    .route("/api/auth/callback", get(auth_callback_handler))
                    .route("/api/auth/refresh", post(auth_refresh_handler))
                    .route("/api/auth/logout", post(auth_logout_handler))
                    .route("/api/userinfo", get(userinfo_handler))
                    .with_state(auth_state);

                let well_known = Router::new()
                    .route(
                        "/.well-known/openid-configuration",
                        get(well_known_handler),
                    )
                    .with_state(authenticator);

                let backchannel = Router::new()
                    .route("/api/oidc/backchannel-logout", post(backchannel_logout))
                    .with_state(Arc::clone(&self.cache));

                app = app.merge(session_routes).merge(well_known).merge(backchannel);
            }
            Err(e) => {
                error!(error = %e, "Control-plane environment not set, OIDC routes disabled");
            }
        }

        Ok(app
            .layer(middleware::from_fn_with_state(
                exchange_state,
                exchange_middleware,
            ))
            .layer(CatchPanicLayer::new())
            .layer(TraceLayer::new_for_http()))
    }

    /// Run the gateway until shutdown.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let app = self.build_router().await?;
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %addr, "Session gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Session gateway stopped");
        Ok(())
    }
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}

// ── Handlers ──────────────────────────────────────────────────────────────

/// `GET /health`
async fn health_handler() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// `GET /.well-known/openid-configuration` — the provider's discovery
/// document as fetched, with public endpoint URLs.
async fn well_known_handler(
    State(authenticator): State<Arc<OidcAuthenticator>>,
) -> impl IntoResponse {
    Json(authenticator.metadata().document.clone())
}

#[derive(Debug, Deserialize)]
struct StartQuery {
    #[serde(default)]
    state: Option<String>,
}

/// `GET /api/auth/start` — redirect the browser to the authorization
/// endpoint, stashing the nonce in a short-lived cookie.
async fn auth_start_handler(
    State(state): State<Arc<AuthState>>,
    Query(query): Query<StartQuery>,
    jar: CookieJar,
) -> Response {
    let request_state = query.state.unwrap_or_default();
    match state.authenticator.start(&request_state) {
        Ok(request) => {
            let jar = jar.add(nonce_cookie(&request.nonce, state.secure_cookies));
            (jar, Redirect::temporary(&request.url)).into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to build authorization redirect");
            error_response(&e)
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: String,
}

/// `GET /api/auth/callback` — exchange the authorization code, set the
/// session cookie, and return the session.
async fn auth_callback_handler(
    State(state): State<Arc<AuthState>>,
    Query(query): Query<CallbackQuery>,
    jar: CookieJar,
) -> Response {
    let nonce = jar.get(NONCE_COOKIE).map(|c| c.value().to_string());

    match state
        .authenticator
        .authenticate(&query.code, nonce.as_deref())
        .await
    {
        Ok(record) => {
            let jar = jar
                .add(session_cookie(
                    &record.tokenset.access_token,
                    state.secure_cookies,
                ))
                .add(clear_nonce_cookie());
            (jar, Json(session_response(&record))).into_response()
        }
        Err(e) => {
            error!(error = %e, "Authorization code exchange failed");
            error_response(&e)
        }
    }
}

/// `POST /api/auth/refresh` — refresh the session, short-circuiting from
/// cache while more than five minutes remain.
async fn auth_refresh_handler(
    State(state): State<Arc<AuthState>>,
    jar: CookieJar,
) -> Response {
    let cookie_token = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());

    match state.authenticator.refresh(cookie_token.as_deref()).await {
        Ok(record) => {
            let jar = jar.add(session_cookie(
                &record.tokenset.access_token,
                state.secure_cookies,
            ));
            (jar, Json(session_response(&record))).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// `POST /api/auth/logout` — purge cached session state, clear the cookie,
/// and revoke the token where the provider supports it.
async fn auth_logout_handler(
    State(state): State<Arc<AuthState>>,
    jar: CookieJar,
) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let token = cookie.value().to_string();
        if let Err(e) = state.authenticator.logout(&token).await {
            error!(error = %e, "Logout failed");
            return error_response(&e);
        }
    }

    let jar = jar.add(clear_session_cookie());
    (jar, Json(json!({"status": "ok"}))).into_response()
}

/// `GET /api/userinfo` — session introspection from the cache.
async fn userinfo_handler(
    State(state): State<Arc<AuthState>>,
    jar: CookieJar,
) -> Response {
    let Some(cookie) = jar.get(SESSION_COOKIE) else {
        return (
            StatusCode::UNAUTHORIZED,
            "Access token not found in Cookie".to_string(),
        )
            .into_response();
    };

    match state.cache.get_session(cookie.value()).await {
        Ok(Some(record)) => Json(record.userinfo).into_response(),
        Ok(None) => {
            (StatusCode::UNAUTHORIZED, "Session not found".to_string()).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// Session payload returned to the browser. The expiry is recomputed at
/// response time rather than echoing the cached absolute value.
fn session_response(record: &SessionRecord) -> serde_json::Value {
    json!({
        "tokenType": record.tokenset.token_type,
        "scope": record.tokenset.scope,
        "expiresInSeconds": record.tokenset.remaining_secs(),
        "profile": record.userinfo,
    })
}

/// Map an [`Error`] to its HTTP response: status from the taxonomy, short
/// text body.
fn error_response(e: &Error) -> Response {
    (e.status(), e.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_is_always_routable() {
        use tower::ServiceExt;

        let app = Router::new().route("/health", get(health_handler));
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn session_response_recomputes_expiry() {
        use crate::cache::{TokenSet, UserInfo};
        use std::time::{SystemTime, UNIX_EPOCH};

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let record = SessionRecord {
            tokenset: TokenSet {
                access_token: "tok".to_string(),
                token_type: "Bearer".to_string(),
                scope: Some("openid".to_string()),
                expires_at: now + 120,
                id_token: None,
                refresh_token: None,
            },
            userinfo: UserInfo::default(),
        };

        let body = session_response(&record);
        let expires = body["expiresInSeconds"].as_u64().unwrap();
        assert!(expires > 100 && expires <= 120);
    }
}
