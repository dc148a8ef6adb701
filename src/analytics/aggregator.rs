//! On-demand click aggregation.
//!
//! Reports are recomputed from raw click rows on every request. All bucketing
//! is done in UTC.

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::analytics::export::{self, ExportFile, ExportFormat};
use crate::analytics::models::{
    AnalyticsReport, CountryBreakdown, DailyClicks, DashboardData, DeviceBreakdown, Period,
    ReferrerBreakdown, ReportSummary, TrendPoint,
};
use crate::analytics::referrer::classify_referrer;
use crate::error::{AppError, AppResult};
use crate::models::{Click, Link, LinkOrder, LinkQuery};
use crate::storage::{unix_now, Storage};

pub const TOP_N: usize = 10;
pub const DASHBOARD_RECENT_LINKS: i64 = 5;
pub const DASHBOARD_TREND_DAYS: i64 = 7;
pub const MAX_CLICK_LOG_LIMIT: i64 = 1000;

const SECS_PER_DAY: i64 = 86_400;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn utc(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

fn day_of(ts: i64) -> NaiveDate {
    utc(ts).date_naive()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Every date from `start` to `end` inclusive.
fn date_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|day| *day <= end)
        .collect()
}

/// Count occurrences keeping first-seen order, then rank by count. The sort
/// is stable, so equal counts stay in first-seen order.
fn ranked_counts(keys: impl Iterator<Item = String>) -> Vec<(String, i64)> {
    let mut order: Vec<(String, i64)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for key in keys {
        match index.get(&key) {
            Some(&i) => order[i].1 += 1,
            None => {
                index.insert(key.clone(), order.len());
                order.push((key, 1));
            }
        }
    }

    order.sort_by(|a, b| b.1.cmp(&a.1));
    order
}

fn with_percentages(ranked: Vec<(String, i64)>, limit: Option<usize>) -> Vec<(String, i64, f64)> {
    let total: i64 = ranked.iter().map(|(_, count)| count).sum();
    ranked
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|(key, count)| {
            let percentage = if total > 0 {
                round2(count as f64 / total as f64 * 100.0)
            } else {
                0.0
            };
            (key, count, percentage)
        })
        .collect()
}

fn summarize(clicks: &[Click]) -> ReportSummary {
    let total_clicks = clicks.len() as i64;
    let unique_clicks = clicks
        .iter()
        .filter_map(|c| non_empty(c.ip_address.as_deref()))
        .collect::<HashSet<_>>()
        .len() as i64;

    let mut hours = [0i64; 24];
    let mut days: BTreeMap<NaiveDate, i64> = BTreeMap::new();
    for click in clicks {
        let at = utc(click.clicked_at);
        hours[at.hour() as usize] += 1;
        *days.entry(at.date_naive()).or_default() += 1;
    }

    // Strictly greater keeps the earliest hour and day on ties
    let mut peak_hour = 0;
    for (hour, count) in hours.iter().enumerate() {
        if *count > hours[peak_hour] {
            peak_hour = hour;
        }
    }

    let mut peak_day: Option<(NaiveDate, i64)> = None;
    for (day, count) in &days {
        if peak_day.is_none_or(|(_, best)| *count > best) {
            peak_day = Some((*day, *count));
        }
    }

    let avg_daily_clicks = if days.is_empty() {
        0.0
    } else {
        round2(total_clicks as f64 / days.len() as f64)
    };

    ReportSummary {
        total_clicks,
        unique_clicks,
        peak_hour: format!("{peak_hour:02}:00"),
        peak_day: peak_day.map(|(day, _)| day.format("%Y-%m-%d").to_string()),
        avg_daily_clicks,
    }
}

fn time_series(clicks: &[Click], start: NaiveDate, end: NaiveDate) -> Vec<DailyClicks> {
    let mut per_day: HashMap<NaiveDate, (i64, HashSet<&str>)> = HashMap::new();
    for click in clicks {
        let entry = per_day.entry(day_of(click.clicked_at)).or_default();
        entry.0 += 1;
        if let Some(ip) = non_empty(click.ip_address.as_deref()) {
            entry.1.insert(ip);
        }
    }

    date_range(start, end)
        .into_iter()
        .map(|day| {
            let (clicks, ips) = per_day
                .get(&day)
                .map(|(count, ips)| (*count, ips.len() as i64))
                .unwrap_or((0, 0));
            DailyClicks {
                date: day.format("%Y-%m-%d").to_string(),
                clicks,
                unique_clicks: ips,
            }
        })
        .collect()
}

/// Build a report from the clicks of one window. `clicks` must already be
/// restricted to `clicked_at >= now - period`.
pub fn build_report(link_id: i64, clicks: &[Click], period: Period, now: i64) -> AnalyticsReport {
    let start = day_of(now - period.days() * SECS_PER_DAY);
    let end = day_of(now);

    let geographic = with_percentages(
        ranked_counts(
            clicks
                .iter()
                .filter_map(|c| non_empty(c.country.as_deref()).map(str::to_string)),
        ),
        Some(TOP_N),
    )
    .into_iter()
    .map(|(country, clicks, percentage)| CountryBreakdown {
        country,
        clicks,
        percentage,
    })
    .collect();

    let devices = with_percentages(
        ranked_counts(
            clicks
                .iter()
                .filter_map(|c| non_empty(c.device_type.as_deref()).map(str::to_string)),
        ),
        None,
    )
    .into_iter()
    .map(|(device_type, clicks, percentage)| DeviceBreakdown {
        device_type,
        clicks,
        percentage,
    })
    .collect();

    let referrers = with_percentages(
        ranked_counts(clicks.iter().map(|c| classify_referrer(c.referer.as_deref()))),
        Some(TOP_N),
    )
    .into_iter()
    .map(|(source, clicks, percentage)| ReferrerBreakdown {
        source,
        clicks,
        percentage,
    })
    .collect();

    AnalyticsReport {
        link_id,
        period,
        summary: summarize(clicks),
        time_series: time_series(clicks, start, end),
        geographic,
        devices,
        referrers,
    }
}

/// Daily click totals for the `days` calendar days ending on the day of `now`.
pub fn click_trend(clicks: &[Click], days: i64, now: i64) -> Vec<TrendPoint> {
    let end = day_of(now);
    let start = end - Duration::days(days - 1);

    let mut per_day: HashMap<NaiveDate, i64> = HashMap::new();
    for click in clicks {
        *per_day.entry(day_of(click.clicked_at)).or_default() += 1;
    }

    date_range(start, end)
        .into_iter()
        .map(|day| TrendPoint {
            date: day.format("%Y-%m-%d").to_string(),
            clicks: per_day.get(&day).copied().unwrap_or(0),
        })
        .collect()
}

pub struct AnalyticsAggregator {
    storage: Arc<dyn Storage>,
}

impl AnalyticsAggregator {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    async fn owned_link(&self, link_id: i64, owner_id: &str) -> AppResult<Link> {
        self.storage
            .get_link(link_id)
            .await?
            .filter(|link| link.owner_id == owner_id)
            .ok_or(AppError::NotFound)
    }

    pub async fn report(
        &self,
        link_id: i64,
        owner_id: &str,
        period: Period,
    ) -> AppResult<AnalyticsReport> {
        self.report_at(link_id, owner_id, period, unix_now()).await
    }

    pub async fn report_at(
        &self,
        link_id: i64,
        owner_id: &str,
        period: Period,
        now: i64,
    ) -> AppResult<AnalyticsReport> {
        let link = self.owned_link(link_id, owner_id).await?;
        let since = now - period.days() * SECS_PER_DAY;
        let clicks = self.storage.clicks_since(link.id, since).await?;

        tracing::debug!(link_id, %period, clicks = clicks.len(), "building analytics report");
        Ok(build_report(link.id, &clicks, period, now))
    }

    pub async fn export(
        &self,
        link_id: i64,
        owner_id: &str,
        period: Period,
        format: ExportFormat,
    ) -> AppResult<ExportFile> {
        let link = self.owned_link(link_id, owner_id).await?;
        let since = unix_now() - period.days() * SECS_PER_DAY;
        let clicks = self.storage.clicks_since(link.id, since).await?;

        tracing::info!(link_id, %period, rows = clicks.len(), "exporting clicks");
        Ok(export::render(link.id, period, format, &clicks)?)
    }

    pub async fn dashboard(&self, owner_id: &str) -> AppResult<DashboardData> {
        self.dashboard_at(owner_id, unix_now()).await
    }

    pub async fn dashboard_at(&self, owner_id: &str, now: i64) -> AppResult<DashboardData> {
        let stats = self.storage.owner_stats(owner_id).await?;
        let unique_visitors = self.storage.owner_unique_visitors(owner_id).await?;

        let recent_links = self
            .storage
            .list_links(
                owner_id,
                &LinkQuery {
                    order: LinkOrder::Newest,
                    limit: DASHBOARD_RECENT_LINKS,
                    ..LinkQuery::default()
                },
            )
            .await?;

        let trend_start = day_of(now) - Duration::days(DASHBOARD_TREND_DAYS - 1);
        let since = trend_start
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or(now - DASHBOARD_TREND_DAYS * SECS_PER_DAY);
        let clicks = self.storage.owner_clicks_since(owner_id, since).await?;

        Ok(DashboardData {
            total_links: stats.total_links,
            total_clicks: stats.total_clicks,
            unique_visitors,
            active_links: stats.active_links,
            recent_links,
            click_trends: click_trend(&clicks, DASHBOARD_TREND_DAYS, now),
        })
    }

    /// Newest clicks for a link owned by `owner_id`.
    pub async fn recent_clicks(
        &self,
        link_id: i64,
        owner_id: &str,
        limit: i64,
    ) -> AppResult<Vec<Click>> {
        if !(1..=MAX_CLICK_LOG_LIMIT).contains(&limit) {
            return Err(AppError::validation(format!(
                "limit must be between 1 and {MAX_CLICK_LOG_LIMIT}"
            )));
        }

        let link = self.owned_link(link_id, owner_id).await?;
        Ok(self.storage.recent_clicks(link.id, limit).await?)
    }
}
