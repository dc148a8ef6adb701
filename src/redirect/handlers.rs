use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use url::Url;

use crate::analytics::{anonymize_ip, extract_client_ip, ClickRecorder, ClientInfo};
use crate::config::AnalyticsConfig;
use crate::error::{AppError, AppResult};
use crate::links::LinkRegistry;

pub struct RedirectState {
    pub registry: LinkRegistry,
    pub recorder: Arc<ClickRecorder>,
    pub analytics_config: AnalyticsConfig,
}

fn header_string(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

fn location_header(original_url: &str) -> AppResult<HeaderValue> {
    if let Ok(value) = HeaderValue::from_str(original_url) {
        return Ok(value);
    }

    // Non-ASCII targets are percent-encoded by the URL parser
    let encoded = Url::parse(original_url)
        .map_err(|e| anyhow::anyhow!("stored URL is not valid: {e}"))?;
    HeaderValue::from_str(encoded.as_str())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid Location header: {e}")))
}

/// Redirect a short code to its target with a 302, recording the click first.
pub async fn redirect_url(
    State(state): State<Arc<RedirectState>>,
    Path(code): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let link = state.registry.resolve(&code).await?;

    let config = &state.analytics_config;
    let mut client_ip = extract_client_ip(&headers, addr.ip(), config);
    if config.ip_anonymization {
        client_ip = anonymize_ip(client_ip);
    }

    let client = ClientInfo {
        ip: Some(client_ip),
        user_agent: header_string(&headers, header::USER_AGENT),
        referer: header_string(&headers, header::REFERER),
    };
    state.recorder.record_best_effort(link.id, &client).await;

    tracing::debug!(short_code = %code, link_id = link.id, "redirecting");

    let location = location_header(&link.original_url)?;
    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    #[derive(Serialize)]
    struct HealthResponse {
        status: String,
    }

    Json(HealthResponse {
        status: "OK".to_string(),
    })
}
