use axum::{
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::analytics::AnalyticsAggregator;
use crate::auth::{auth_middleware, AuthService};
use crate::config::Config;
use crate::links::{CodeGenerator, LinkRegistry};
use crate::storage::Storage;

use super::analytics::{dashboard, export_clicks, link_report};
use super::handlers::{
    batch_create_links, create_link, delete_link, get_link, health_check, link_clicks, list_links,
    popular_links, preview_link, recent_links, toggle_link_status, update_link, AppState,
};

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(allowed)
}

pub fn create_api_router(
    storage: Arc<dyn Storage>,
    auth_service: Arc<AuthService>,
    config: &Config,
) -> Router {
    let codes = CodeGenerator::new(config.short_code.length, config.short_code.max_attempts);
    let state = Arc::new(AppState {
        registry: LinkRegistry::new(Arc::clone(&storage), codes),
        analytics: AnalyticsAggregator::new(storage),
        redirect_base_url: config.redirect_base_url.clone(),
    });

    let protected_routes = Router::new()
        .route("/links", post(create_link).get(list_links))
        .route("/links/batch", post(batch_create_links))
        .route("/links/recent", get(recent_links))
        .route("/links/popular", get(popular_links))
        .route(
            "/links/{id}",
            get(get_link).put(update_link).delete(delete_link),
        )
        .route("/links/{id}/toggle-status", post(toggle_link_status))
        .route("/links/{id}/clicks", get(link_clicks))
        .route("/analytics/links/{id}", get(link_report))
        .route("/analytics/export/{id}", get(export_clicks))
        .route("/analytics/dashboard", get(dashboard))
        .route_layer(middleware::from_fn(move |headers, req, next| {
            let auth = Arc::clone(&auth_service);
            auth_middleware(auth, headers, req, next)
        }));

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/redirect/{short_code}", get(preview_link))
        .merge(protected_routes)
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http())
}
