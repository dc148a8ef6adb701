//! Best-effort User-Agent classification.

use std::fmt;
use woothee::parser::Parser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
}

impl DeviceType {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
            DeviceType::Desktop => "desktop",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserAgentInfo {
    pub browser: Option<String>,
    pub os: Option<String>,
    pub device_type: Option<DeviceType>,
}

fn known(value: &str) -> Option<String> {
    (!value.is_empty() && value != "UNKNOWN").then(|| value.to_string())
}

fn looks_like_tablet(ua: &str) -> bool {
    let lower = ua.to_ascii_lowercase();
    lower.contains("ipad")
        || lower.contains("tablet")
        || (lower.contains("android") && !lower.contains("mobile"))
}

/// Parse a User-Agent header. An empty or missing header yields no fields.
pub fn parse_user_agent(ua: Option<&str>) -> UserAgentInfo {
    let Some(ua) = ua.map(str::trim).filter(|ua| !ua.is_empty()) else {
        return UserAgentInfo::default();
    };

    let (browser, os, category) = match Parser::new().parse(ua) {
        Some(result) => (known(result.name), known(result.os), result.category),
        None => (None, None, ""),
    };

    let device_type = if looks_like_tablet(ua) {
        DeviceType::Tablet
    } else if matches!(category, "smartphone" | "mobilephone") {
        DeviceType::Mobile
    } else {
        DeviceType::Desktop
    };

    UserAgentInfo {
        browser,
        os,
        device_type: Some(device_type),
    }
}
