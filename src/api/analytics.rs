//! Analytics API handlers

use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::header,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::analytics::models::TrendPoint;
use crate::analytics::{AnalyticsReport, ExportFormat, Period};
use crate::auth::AuthenticatedUser;
use crate::error::AppResult;

use super::handlers::{AppState, LinkResponse};

#[derive(Debug, Deserialize)]
pub struct ReportParams {
    pub period: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExportParams {
    pub format: Option<String>,
    pub period: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub total_links: i64,
    pub total_clicks: i64,
    pub unique_visitors: i64,
    pub active_links: i64,
    pub recent_links: Vec<LinkResponse>,
    pub click_trends: Vec<TrendPoint>,
}

fn parse_period(raw: Option<&str>) -> AppResult<Period> {
    raw.map(str::parse::<Period>).transpose().map(Option::unwrap_or_default)
}

/// Report for one link over `?period=day|week|month|year` (default week)
pub async fn link_report(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    path: Result<Path<i64>, PathRejection>,
    params: Result<Query<ReportParams>, QueryRejection>,
) -> AppResult<Json<AnalyticsReport>> {
    let Path(id) = path?;
    let Query(params) = params?;
    let period = parse_period(params.period.as_deref())?;

    let report = state.analytics.report(id, &user.user_id, period).await?;
    Ok(Json(report))
}

/// Download the raw clicks of a window as CSV or JSON
pub async fn export_clicks(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    path: Result<Path<i64>, PathRejection>,
    params: Result<Query<ExportParams>, QueryRejection>,
) -> AppResult<Response> {
    let Path(id) = path?;
    let Query(params) = params?;
    let period = parse_period(params.period.as_deref())?;
    let format = params
        .format
        .as_deref()
        .map(str::parse::<ExportFormat>)
        .transpose()?
        .unwrap_or_default();

    let file = state
        .analytics
        .export(id, &user.user_id, period, format)
        .await?;

    let disposition = format!("attachment; filename={}", file.filename);

    Ok((
        [
            (header::CONTENT_TYPE, file.format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        file.body,
    )
        .into_response())
}

pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> AppResult<Json<DashboardResponse>> {
    let data = state.analytics.dashboard(&user.user_id).await?;

    Ok(Json(DashboardResponse {
        total_links: data.total_links,
        total_clicks: data.total_clicks,
        unique_visitors: data.unique_visitors,
        active_links: data.active_links,
        recent_links: data
            .recent_links
            .into_iter()
            .map(|link| state.link_response(link))
            .collect(),
        click_trends: data.click_trends,
    }))
}
