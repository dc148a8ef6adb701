//! Redirect integration tests
//!
//! These tests drive the public redirect router end to end: status codes for
//! every link state, the `Location` header, and the click row written on the
//! way through.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use shortlink::analytics::{ClickRecorder, UnknownGeoLookup};
use shortlink::config::AnalyticsConfig;
use shortlink::models::{LinkPatch, NewLink};
use shortlink::redirect;
use shortlink::storage::{unix_now, SqliteStorage, Storage};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::{Layer, ServiceExt};

/// Helper to create test storage
async fn create_test_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

/// Helper layer to inject ConnectInfo for tests
#[derive(Clone)]
struct TestConnectInfoLayer;

impl<S> Layer<S> for TestConnectInfoLayer {
    type Service = TestConnectInfoMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TestConnectInfoMiddleware { inner }
    }
}

#[derive(Clone)]
struct TestConnectInfoMiddleware<S> {
    inner: S,
}

impl<S, B> tower::Service<Request<B>> for TestConnectInfoMiddleware<S>
where
    S: tower::Service<Request<B>> + Clone,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let addr = SocketAddr::from(([203, 0, 113, 7], 12345));
        req.extensions_mut()
            .insert(axum::extract::connect_info::ConnectInfo(addr));
        self.inner.call(req)
    }
}

fn create_app(storage: &Arc<dyn Storage>, config: AnalyticsConfig) -> Router {
    let recorder = Arc::new(ClickRecorder::new(
        Arc::clone(storage),
        Arc::new(UnknownGeoLookup),
    ));
    redirect::create_redirect_router(Arc::clone(storage), recorder, config)
        .layer(TestConnectInfoLayer)
}

async fn insert_link(storage: &Arc<dyn Storage>, code: &str, url: &str) -> i64 {
    storage
        .create_link(&NewLink {
            short_code: code.to_string(),
            original_url: url.to_string(),
            owner_id: "owner".to_string(),
            title: None,
            description: None,
            tags: None,
            is_public: false,
            password: None,
            expires_at: None,
        })
        .await
        .unwrap()
        .id
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_redirect_active_link() {
    let storage = create_test_storage().await;
    let link_id = insert_link(&storage, "go_here", "https://example.com/destination").await;

    let response = create_app(&storage, AnalyticsConfig::default())
        .oneshot(get("/go_here"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "https://example.com/destination"
    );

    // The click is written before the response goes out
    let link = storage.get_link(link_id).await.unwrap().unwrap();
    assert_eq!(link.click_count, 1);

    let clicks = storage.recent_clicks(link_id, 10).await.unwrap();
    assert_eq!(clicks.len(), 1);
    assert_eq!(clicks[0].ip_address.as_deref(), Some("203.0.113.7"));
    assert_eq!(clicks[0].country, None);
}

#[tokio::test]
async fn test_redirect_unknown_code() {
    let storage = create_test_storage().await;

    let response = create_app(&storage, AnalyticsConfig::default())
        .oneshot(get("/missing"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Link not found");
}

#[tokio::test]
async fn test_redirect_disabled_link() {
    let storage = create_test_storage().await;
    let link_id = insert_link(&storage, "off", "https://example.com").await;
    storage.toggle_link_active(link_id, "owner").await.unwrap();

    let response = create_app(&storage, AnalyticsConfig::default())
        .oneshot(get("/off"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::GONE);
    let body = body_json(response).await;
    assert_eq!(body["error"], "This link has been disabled");

    // No click for a refused redirect
    let link = storage.get_link(link_id).await.unwrap().unwrap();
    assert_eq!(link.click_count, 0);
}

#[tokio::test]
async fn test_redirect_expired_link() {
    let storage = create_test_storage().await;
    let link_id = insert_link(&storage, "old", "https://example.com").await;
    let patch = LinkPatch {
        expires_at: Some(Some(unix_now() - 60)),
        ..Default::default()
    };
    storage
        .update_link(link_id, "owner", &patch)
        .await
        .unwrap()
        .unwrap();

    let response = create_app(&storage, AnalyticsConfig::default())
        .oneshot(get("/old"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::GONE);
    let body = body_json(response).await;
    assert_eq!(body["error"], "This link has expired");
}

#[tokio::test]
async fn test_redirect_records_request_details() {
    let storage = create_test_storage().await;
    let link_id = insert_link(&storage, "details", "https://example.com").await;

    let request = Request::builder()
        .uri("/details")
        .header(
            header::USER_AGENT,
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        )
        .header(header::REFERER, "https://www.google.com/search?q=shortlink")
        .body(Body::empty())
        .unwrap();

    let response = create_app(&storage, AnalyticsConfig::default())
        .oneshot(request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);

    let clicks = storage.recent_clicks(link_id, 10).await.unwrap();
    assert_eq!(clicks.len(), 1);
    let click = &clicks[0];
    assert_eq!(
        click.referer.as_deref(),
        Some("https://www.google.com/search?q=shortlink")
    );
    assert_eq!(click.browser.as_deref(), Some("Chrome"));
    assert_eq!(click.device_type.as_deref(), Some("desktop"));
}

#[tokio::test]
async fn test_redirect_anonymizes_ip() {
    let storage = create_test_storage().await;
    let link_id = insert_link(&storage, "anon", "https://example.com").await;

    let config = AnalyticsConfig {
        ip_anonymization: true,
        ..Default::default()
    };
    let response = create_app(&storage, config)
        .oneshot(get("/anon"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);

    let clicks = storage.recent_clicks(link_id, 10).await.unwrap();
    assert_eq!(clicks[0].ip_address.as_deref(), Some("203.0.113.0"));
}

#[tokio::test]
async fn test_forwarded_header_ignored_without_proxy_mode() {
    let storage = create_test_storage().await;
    let link_id = insert_link(&storage, "spoof", "https://example.com").await;

    let request = Request::builder()
        .uri("/spoof")
        .header("x-forwarded-for", "1.2.3.4")
        .body(Body::empty())
        .unwrap();
    create_app(&storage, AnalyticsConfig::default())
        .oneshot(request)
        .await
        .unwrap();

    let clicks = storage.recent_clicks(link_id, 10).await.unwrap();
    assert_eq!(clicks[0].ip_address.as_deref(), Some("203.0.113.7"));
}

#[tokio::test]
async fn test_repeated_redirects_count_every_click() {
    let storage = create_test_storage().await;
    let link_id = insert_link(&storage, "busy", "https://example.com").await;
    let app = create_app(&storage, AnalyticsConfig::default());

    for _ in 0..5 {
        let response = app.clone().oneshot(get("/busy")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
    }

    let link = storage.get_link(link_id).await.unwrap().unwrap();
    assert_eq!(link.click_count, 5);
    assert_eq!(storage.recent_clicks(link_id, 100).await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_health_check() {
    let storage = create_test_storage().await;

    let response = create_app(&storage, AnalyticsConfig::default())
        .oneshot(get("/"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "OK");
}
