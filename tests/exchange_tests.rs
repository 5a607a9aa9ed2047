//! End-to-end exchange middleware tests
//!
//! Runs the middleware against a real mock IDM server on an ephemeral
//! listener, covering:
//! - the full cache-miss round trip (header rewrite + both cache tiers)
//! - cache hits skipping the IDM entirely
//! - IDM failures surfacing as 401 with the specific reason

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    Json, Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    middleware,
    routing::{get, post},
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt;

use cp_session_gateway::cache::TokenCache;
use cp_session_gateway::config::IdmConfig;
use cp_session_gateway::exchange::{ExchangeState, IdmClient, exchange_middleware};

const CIC_TOKEN: &str = "CIC~AbCdEfGhIjKlMnOpQrStUvWx";

fn epoch_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Echo back the Authorization header the protected route observed.
async fn probe(headers: HeaderMap) -> String {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("<none>")
        .to_string()
}

/// Spawn a mock IDM that validates the exchange contract and counts calls.
async fn spawn_idm(calls: Arc<AtomicUsize>) -> String {
    let handler = move |headers: HeaderMap, Json(body): Json<Value>| {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);

            // Contract: bearer auth + {token, tenant_id} body
            let auth = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            assert_eq!(auth, format!("Bearer {CIC_TOKEN}"));
            assert_eq!(body["token"], CIC_TOKEN);
            assert_eq!(body["tenant_id"], "TSC");

            Json(json!({
                "jwt": "X",
                "secondaryKey": "sk1",
                "expiryTime": epoch_now() + 3600,
            }))
        }
    };

    let app = Router::new().route("/idm/v1/jwt", post(handler));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}/idm/v1/jwt")
}

/// Spawn a mock IDM that always fails with the given status.
async fn spawn_failing_idm(status: StatusCode) -> String {
    let app = Router::new().route(
        "/idm/v1/jwt",
        post(move || async move { (status, "idm exploded") }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}/idm/v1/jwt")
}

fn app(cache: Arc<TokenCache>, jwt_api_path: String) -> Router {
    let state = Arc::new(ExchangeState {
        cache,
        idm: IdmClient::new(IdmConfig {
            jwt_api_path,
            tenant_id: "TSC".to_string(),
        })
        .unwrap(),
    });

    Router::new()
        .route("/probe", get(probe))
        .layer(middleware::from_fn_with_state(state, exchange_middleware))
}

fn probe_request() -> Request<Body> {
    Request::builder()
        .uri("/probe")
        .header("authorization", format!("Bearer {CIC_TOKEN}"))
        .body(Body::empty())
        .unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn cache_miss_round_trip_populates_cache_and_rewrites_header() {
    let calls = Arc::new(AtomicUsize::new(0));
    let idm_url = spawn_idm(Arc::clone(&calls)).await;
    let cache = Arc::new(TokenCache::in_memory());

    let response = app(Arc::clone(&cache), idm_url)
        .oneshot(probe_request())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "Bearer X");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Both tiers hold the record under the original token
    let record = cache.get_downstream(CIC_TOKEN).await.unwrap().unwrap();
    assert_eq!(record.jwt, "X");
    assert_eq!(record.secondary_key, "sk1");

    // And the secondary index points back at the bearer
    assert_eq!(
        cache.get_secondary("sk1").await.unwrap(),
        Some(CIC_TOKEN.to_string())
    );
}

#[tokio::test]
async fn second_request_is_served_from_cache() {
    let calls = Arc::new(AtomicUsize::new(0));
    let idm_url = spawn_idm(Arc::clone(&calls)).await;
    let cache = Arc::new(TokenCache::in_memory());
    let app = app(cache, idm_url);

    let first = app.clone().oneshot(probe_request()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.oneshot(probe_request()).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(body_string(second).await, "Bearer X");

    // One exchange call total; the second request hit the in-memory tier
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn idm_http_failure_surfaces_as_401_with_reason() {
    let idm_url = spawn_failing_idm(StatusCode::INTERNAL_SERVER_ERROR).await;
    let cache = Arc::new(TokenCache::in_memory());

    let response = app(Arc::clone(&cache), idm_url)
        .oneshot(probe_request())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_string(response).await,
        "IDM exchange failed: HTTP 500"
    );

    // Nothing was cached on the failure path
    assert_eq!(cache.get_downstream(CIC_TOKEN).await.unwrap(), None);
}

#[tokio::test]
async fn requests_without_credentials_never_touch_the_idm() {
    let calls = Arc::new(AtomicUsize::new(0));
    let idm_url = spawn_idm(Arc::clone(&calls)).await;
    let cache = Arc::new(TokenCache::in_memory());

    let response = app(cache, idm_url)
        .oneshot(
            Request::builder()
                .uri("/probe")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "<none>");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
