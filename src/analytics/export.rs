//! Raw click exports as CSV or JSON.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat};
use serde::Serialize;
use std::str::FromStr;

use crate::analytics::models::Period;
use crate::error::AppError;
use crate::models::Click;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Json => "application/json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(AppError::validation(format!(
                "Unknown export format '{other}', expected csv or json"
            ))),
        }
    }
}

/// One exported click. Field order is the CSV column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRow {
    pub clicked_at: String,
    pub ip_address: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub referer: Option<String>,
}

impl From<&Click> for ExportRow {
    fn from(click: &Click) -> Self {
        let clicked_at = DateTime::from_timestamp(click.clicked_at, 0)
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_else(|| click.clicked_at.to_string());

        Self {
            clicked_at,
            ip_address: click.ip_address.clone(),
            country: click.country.clone(),
            city: click.city.clone(),
            device_type: click.device_type.clone(),
            browser: click.browser.clone(),
            os: click.os.clone(),
            referer: click.referer.clone(),
        }
    }
}

/// A rendered export ready to be served as a download.
#[derive(Debug, Clone)]
pub struct ExportFile {
    pub filename: String,
    pub format: ExportFormat,
    pub body: Vec<u8>,
}

pub fn export_filename(link_id: i64, period: Period, format: ExportFormat) -> String {
    format!("analytics_{link_id}_{period}.{}", format.extension())
}

pub fn to_csv(clicks: &[Click]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(vec![]);

    if clicks.is_empty() {
        writer.write_record([
            "clicked_at",
            "ip_address",
            "country",
            "city",
            "device_type",
            "browser",
            "os",
            "referer",
        ])?;
    }

    for click in clicks {
        writer.serialize(ExportRow::from(click))?;
    }

    writer.into_inner().context("Failed to flush CSV writer")
}

pub fn to_json(clicks: &[Click]) -> Result<Vec<u8>> {
    let rows: Vec<ExportRow> = clicks.iter().map(ExportRow::from).collect();
    Ok(serde_json::to_vec_pretty(&rows)?)
}

pub fn render(
    link_id: i64,
    period: Period,
    format: ExportFormat,
    clicks: &[Click],
) -> Result<ExportFile> {
    let body = match format {
        ExportFormat::Csv => to_csv(clicks)?,
        ExportFormat::Json => to_json(clicks)?,
    };

    Ok(ExportFile {
        filename: export_filename(link_id, period, format),
        format,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click(clicked_at: i64) -> Click {
        Click {
            id: 1,
            link_id: 7,
            ip_address: Some("203.0.113.5".to_string()),
            user_agent: None,
            referer: None,
            country: Some("Iceland".to_string()),
            city: None,
            device_type: Some("desktop".to_string()),
            browser: Some("Firefox".to_string()),
            os: Some("Linux".to_string()),
            clicked_at,
        }
    }

    #[test]
    fn csv_has_header_and_rfc3339_times() {
        let body = String::from_utf8(to_csv(&[click(1_700_000_000)]).unwrap()).unwrap();
        let mut lines = body.lines();
        assert_eq!(
            lines.next(),
            Some("clicked_at,ip_address,country,city,device_type,browser,os,referer")
        );
        assert_eq!(
            lines.next(),
            Some("2023-11-14T22:13:20Z,203.0.113.5,Iceland,,desktop,Firefox,Linux,")
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn empty_csv_still_has_header() {
        let body = String::from_utf8(to_csv(&[]).unwrap()).unwrap();
        assert!(body.starts_with("clicked_at,ip_address,"));
    }

    #[test]
    fn json_uses_same_keys() {
        let body = to_json(&[click(0)]).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value[0]["clicked_at"], "1970-01-01T00:00:00Z");
        assert_eq!(value[0]["city"], serde_json::Value::Null);
        assert_eq!(value[0]["referer"], serde_json::Value::Null);
    }

    #[test]
    fn filename_includes_link_and_period() {
        assert_eq!(
            export_filename(42, Period::Month, ExportFormat::Json),
            "analytics_42_month.json"
        );
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}
