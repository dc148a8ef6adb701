//! Concurrent API integration tests
//!
//! These tests verify that short code allocation stays unique when many
//! creation requests race each other through the API router.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use shortlink::api;
use shortlink::auth::AuthService;
use shortlink::config::{AuthConfig, AuthMode, Config};
use shortlink::storage::{SqliteStorage, Storage};
use std::collections::HashSet;
use std::sync::Arc;
use tower::ServiceExt;

/// Helper to create test storage
async fn create_test_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

fn create_test_app(storage: Arc<dyn Storage>) -> Router {
    let auth_service = Arc::new(
        AuthService::new(&AuthConfig {
            mode: AuthMode::None,
            jwt: None,
        })
        .unwrap(),
    );
    api::create_api_router(storage, auth_service, &Config::default())
}

fn create_request(body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/links")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_concurrent_custom_code_creation() {
    let app = create_test_app(create_test_storage().await);

    let mut handles = vec![];
    for i in 0..10 {
        let app_clone = app.clone();
        let handle = tokio::spawn(async move {
            let request = create_request(format!(
                r#"{{"original_url": "https://example.com/{i}", "short_code": "race_me"}}"#
            ));
            app_clone.oneshot(request).await.unwrap()
        });
        handles.push((i, handle));
    }

    let mut success_count = 0;
    let mut conflict_count = 0;
    for (i, handle) in handles {
        let response = handle.await.unwrap();
        match response.status() {
            StatusCode::CREATED => success_count += 1,
            StatusCode::BAD_REQUEST => {
                let body = body_json(response).await;
                assert_eq!(body["error"], "Short code 'race_me' is already taken");
                conflict_count += 1;
            }
            status => panic!("Request {} got unexpected status: {}", i, status),
        }
    }

    assert_eq!(success_count, 1, "Exactly one creation should succeed");
    assert_eq!(conflict_count, 9, "All others should be told the code is taken");
}

#[tokio::test]
async fn test_concurrent_generated_codes_are_unique() {
    let app = create_test_app(create_test_storage().await);

    let mut handles = vec![];
    for i in 0..20 {
        let app_clone = app.clone();
        handles.push(tokio::spawn(async move {
            let request = create_request(format!(r#"{{"original_url": "https://example.com/{i}"}}"#));
            app_clone.oneshot(request).await.unwrap()
        }));
    }

    let mut codes = HashSet::new();
    for handle in handles {
        let response = handle.await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        let code = body["short_code"].as_str().unwrap().to_string();
        assert_eq!(code.len(), 6);
        assert_eq!(
            body["short_url"],
            format!("http://localhost:3000/{}", code).as_str()
        );
        codes.insert(code);
    }

    assert_eq!(codes.len(), 20, "Every generated code should be distinct");
}

#[tokio::test]
async fn test_batch_creation_assigns_distinct_codes() {
    let app = create_test_app(create_test_storage().await);

    let request = Request::builder()
        .method("POST")
        .uri("/api/links/batch")
        .header("content-type", "application/json")
        .body(Body::from(
            r#"{"urls": ["https://a.example", "b.example/path", "ftp://c.example"]}"#,
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success_count"], 2);
    assert_eq!(body["failure_count"], 1);
    assert_eq!(body["failed"][0]["url"], "ftp://c.example");

    let created = body["created"].as_array().unwrap();
    assert_eq!(created[1]["original_url"], "https://b.example/path");
    let codes: HashSet<&str> = created
        .iter()
        .map(|link| link["short_code"].as_str().unwrap())
        .collect();
    assert_eq!(codes.len(), 2);
}

#[tokio::test]
async fn test_invalid_custom_code_rejected() {
    let app = create_test_app(create_test_storage().await);

    for code in ["ab", "has space", "way_too_long_for_a_short_code"] {
        let response = app
            .clone()
            .oneshot(create_request(format!(
                r#"{{"original_url": "https://example.com", "short_code": "{code}"}}"#
            )))
            .await
            .unwrap();
        assert_eq!(
            response.status(),
            StatusCode::BAD_REQUEST,
            "custom code {:?} should be rejected",
            code
        );
    }
}

#[tokio::test]
async fn test_cursor_pagination_walks_every_link() {
    let app = create_test_app(create_test_storage().await);

    for i in 0..7 {
        let response = app
            .clone()
            .oneshot(create_request(format!(
                r#"{{"original_url": "https://example.com/{i}"}}"#
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let mut seen = HashSet::new();
    let mut cursor: Option<String> = None;
    loop {
        let uri = match &cursor {
            Some(c) => format!("/api/links?limit=3&cursor={}", c),
            None => "/api/links?limit=3".to_string(),
        };
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["total"], 7);
        for item in body["items"].as_array().unwrap() {
            assert!(seen.insert(item["id"].as_i64().unwrap()), "duplicate row across pages");
        }

        match body["next_cursor"].as_str() {
            Some(next) => cursor = Some(next.to_string()),
            None => break,
        }
    }

    assert_eq!(seen.len(), 7);
}

#[tokio::test]
async fn test_tampered_cursor_rejected() {
    let app = create_test_app(create_test_storage().await);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/links?cursor=bm90LWEtY3Vyc29y.c2lnbmF0dXJl")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Invalid cursor");
}
