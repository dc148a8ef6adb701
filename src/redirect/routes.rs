use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::analytics::ClickRecorder;
use crate::config::AnalyticsConfig;
use crate::links::{CodeGenerator, LinkRegistry};
use crate::storage::Storage;

use super::handlers::{health_check, redirect_url, RedirectState};

/// Public redirect router. Serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()` so the handler can
/// see the peer address.
pub fn create_redirect_router(
    storage: Arc<dyn Storage>,
    recorder: Arc<ClickRecorder>,
    analytics_config: AnalyticsConfig,
) -> Router {
    let state = Arc::new(RedirectState {
        registry: LinkRegistry::new(storage, CodeGenerator::default()),
        recorder,
        analytics_config,
    });

    Router::new()
        .route("/", get(health_check))
        .route("/{code}", get(redirect_url))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
