//! Data models for analytics

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;
use crate::models::Link;

/// Geographic location derived from an IP address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub country: Option<String>,
    pub city: Option<String>,
}

/// Lookback window for reports and exports, anchored at request time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    #[default]
    Week,
    Month,
    Year,
}

impl Period {
    pub fn days(self) -> i64 {
        match self {
            Period::Day => 1,
            Period::Week => 7,
            Period::Month => 30,
            Period::Year => 365,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::Year => "year",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "day" => Ok(Period::Day),
            "week" => Ok(Period::Week),
            "month" => Ok(Period::Month),
            "year" => Ok(Period::Year),
            other => Err(AppError::validation(format!(
                "Unknown period '{other}', expected day, week, month or year"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub total_clicks: i64,
    pub unique_clicks: i64,
    /// Busiest UTC hour as `HH:00`
    pub peak_hour: String,
    /// Busiest UTC date as `YYYY-MM-DD`
    pub peak_day: Option<String>,
    pub avg_daily_clicks: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyClicks {
    pub date: String,
    pub clicks: i64,
    pub unique_clicks: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryBreakdown {
    pub country: String,
    pub clicks: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceBreakdown {
    #[serde(rename = "type")]
    pub device_type: String,
    pub clicks: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferrerBreakdown {
    pub source: String,
    pub clicks: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsReport {
    pub link_id: i64,
    pub period: Period,
    pub summary: ReportSummary,
    pub time_series: Vec<DailyClicks>,
    pub geographic: Vec<CountryBreakdown>,
    pub devices: Vec<DeviceBreakdown>,
    pub referrers: Vec<ReferrerBreakdown>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrendPoint {
    pub date: String,
    pub clicks: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardData {
    pub total_links: i64,
    pub total_clicks: i64,
    pub unique_visitors: i64,
    pub active_links: i64,
    pub recent_links: Vec<Link>,
    pub click_trends: Vec<TrendPoint>,
}
