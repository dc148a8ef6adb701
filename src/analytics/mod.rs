//! Click recording and analytics.
//!
//! Every redirect stores one raw click row. Reports, exports and the
//! dashboard are computed from those rows on demand.

pub mod aggregator;
pub mod export;
pub mod geoip;
pub mod ip_extractor;
pub mod models;
pub mod recorder;
pub mod referrer;
pub mod user_agent;

pub use aggregator::AnalyticsAggregator;
pub use export::{ExportFile, ExportFormat};
pub use geoip::{build_geo_lookup, GeoIpService, GeoLookup, UnknownGeoLookup};
pub use ip_extractor::{anonymize_ip, extract_client_ip};
pub use models::{AnalyticsReport, DashboardData, GeoLocation, Period};
pub use recorder::{ClickRecorder, ClientInfo};
