use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::analytics::AnalyticsAggregator;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::links::{BatchFailure, LinkRegistry, ListOptions};
use crate::models::{BatchCreateRequest, Click, CreateLinkRequest, Link, LinkPatch, LinkPreview};

pub struct AppState {
    pub registry: LinkRegistry,
    pub analytics: AnalyticsAggregator,
    pub redirect_base_url: String,
}

impl AppState {
    pub fn link_response(&self, link: Link) -> LinkResponse {
        let short_url = format!(
            "{}/{}",
            self.redirect_base_url.trim_end_matches('/'),
            link.short_code
        );
        LinkResponse { link, short_url }
    }
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub message: String,
}

/// A link as returned by the API, with its public short URL.
#[derive(Debug, Serialize)]
pub struct LinkResponse {
    #[serde(flatten)]
    pub link: Link,
    pub short_url: String,
}

#[derive(Debug, Serialize)]
pub struct LinkListResponse {
    pub items: Vec<LinkResponse>,
    pub total: i64,
    pub skip: i64,
    pub limit: i64,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchCreateResponse {
    pub created: Vec<LinkResponse>,
    pub failed: Vec<BatchFailure>,
    pub success_count: usize,
    pub failure_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_page_limit")]
    pub limit: i64,
    pub search: Option<String>,
    pub cursor: Option<String>,
}

fn default_page_limit() -> i64 {
    20
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

/// Health check endpoint
pub async fn health_check() -> Json<SuccessResponse> {
    Json(SuccessResponse {
        message: "OK".to_string(),
    })
}

/// Public preview of a short code, regardless of its state
pub async fn preview_link(
    State(state): State<Arc<AppState>>,
    path: Result<Path<String>, PathRejection>,
) -> AppResult<Json<LinkPreview>> {
    let Path(short_code) = path?;
    let link = state.registry.lookup(&short_code).await?;
    Ok(Json(LinkPreview::from(&link)))
}

pub async fn create_link(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    payload: Result<Json<CreateLinkRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<LinkResponse>)> {
    let Json(request) = payload?;
    let link = state.registry.create(&user.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(state.link_response(link))))
}

pub async fn batch_create_links(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    payload: Result<Json<BatchCreateRequest>, JsonRejection>,
) -> AppResult<Json<BatchCreateResponse>> {
    let Json(request) = payload?;
    let outcome = state
        .registry
        .create_batch(&user.user_id, request.urls)
        .await?;

    let created: Vec<LinkResponse> = outcome
        .created
        .into_iter()
        .map(|link| state.link_response(link))
        .collect();

    Ok(Json(BatchCreateResponse {
        success_count: created.len(),
        failure_count: outcome.failed.len(),
        created,
        failed: outcome.failed,
    }))
}

pub async fn list_links(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> AppResult<Json<LinkListResponse>> {
    let Query(query) = query?;
    let page = state
        .registry
        .list(
            &user.user_id,
            ListOptions {
                search: query.search,
                skip: query.skip,
                limit: query.limit,
                cursor: query.cursor,
            },
        )
        .await?;

    Ok(Json(LinkListResponse {
        items: page
            .items
            .into_iter()
            .map(|link| state.link_response(link))
            .collect(),
        total: page.total,
        skip: page.skip,
        limit: page.limit,
        next_cursor: page.next_cursor,
    }))
}

pub async fn recent_links(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> AppResult<Json<Vec<LinkResponse>>> {
    let Query(query) = query?;
    let links = state
        .registry
        .recent(&user.user_id, query.limit.unwrap_or(5))
        .await?;
    Ok(Json(
        links.into_iter().map(|l| state.link_response(l)).collect(),
    ))
}

pub async fn popular_links(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> AppResult<Json<Vec<LinkResponse>>> {
    let Query(query) = query?;
    let links = state
        .registry
        .popular(&user.user_id, query.limit.unwrap_or(10))
        .await?;
    Ok(Json(
        links.into_iter().map(|l| state.link_response(l)).collect(),
    ))
}

pub async fn get_link(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    path: Result<Path<i64>, PathRejection>,
) -> AppResult<Json<LinkResponse>> {
    let Path(id) = path?;
    let link = state.registry.get(id, &user.user_id).await?;
    Ok(Json(state.link_response(link)))
}

pub async fn update_link(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<LinkPatch>, JsonRejection>,
) -> AppResult<Json<LinkResponse>> {
    let Path(id) = path?;
    let Json(patch) = payload?;
    let link = state.registry.update(id, &user.user_id, patch).await?;
    Ok(Json(state.link_response(link)))
}

pub async fn delete_link(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    path: Result<Path<i64>, PathRejection>,
) -> AppResult<Json<SuccessResponse>> {
    let Path(id) = path?;
    if !state.registry.delete(id, &user.user_id).await? {
        return Err(AppError::NotFound);
    }

    Ok(Json(SuccessResponse {
        message: "Link deleted".to_string(),
    }))
}

pub async fn toggle_link_status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    path: Result<Path<i64>, PathRejection>,
) -> AppResult<Json<LinkResponse>> {
    let Path(id) = path?;
    let link = state.registry.toggle_status(id, &user.user_id).await?;
    Ok(Json(state.link_response(link)))
}

/// Raw click log for a link, newest first
pub async fn link_clicks(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    path: Result<Path<i64>, PathRejection>,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> AppResult<Json<Vec<Click>>> {
    let Path(id) = path?;
    let Query(query) = query?;
    let clicks = state
        .analytics
        .recent_clicks(id, &user.user_id, query.limit.unwrap_or(100))
        .await?;
    Ok(Json(clicks))
}
