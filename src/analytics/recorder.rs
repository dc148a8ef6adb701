//! Click recording on the redirect path.

use anyhow::{Context, Result};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::analytics::geoip::GeoLookup;
use crate::analytics::user_agent::parse_user_agent;
use crate::models::NewClick;
use crate::storage::{unix_now, Storage};

/// What the redirect handler knows about a visitor.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip: Option<IpAddr>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
}

pub struct ClickRecorder {
    storage: Arc<dyn Storage>,
    geo: Arc<dyn GeoLookup>,
}

impl ClickRecorder {
    pub fn new(storage: Arc<dyn Storage>, geo: Arc<dyn GeoLookup>) -> Self {
        Self { storage, geo }
    }

    /// Store one click and bump the link's counter.
    ///
    /// The insert and the increment are separate statements. If the
    /// increment fails the click row stays and `click_count` lags by one.
    pub async fn record(&self, link_id: i64, client: &ClientInfo) -> Result<i64> {
        let ua = parse_user_agent(client.user_agent.as_deref());
        let location = client
            .ip
            .map(|ip| self.geo.lookup(ip))
            .unwrap_or_default();

        let click = NewClick {
            link_id,
            ip_address: client.ip.map(|ip| ip.to_string()),
            user_agent: client.user_agent.clone(),
            referer: client.referer.clone(),
            country: location.country,
            city: location.city,
            device_type: ua.device_type.map(|d| d.as_str().to_string()),
            browser: ua.browser,
            os: ua.os,
            clicked_at: unix_now(),
        };

        let click_id = self
            .storage
            .insert_click(&click)
            .await
            .context("Failed to insert click")?;

        self.storage
            .increment_clicks(link_id)
            .await
            .with_context(|| format!("Click {click_id} stored but click_count not incremented"))?;

        debug!(link_id, click_id, "recorded click");
        Ok(click_id)
    }

    /// [`record`](Self::record) for the redirect path: failures are logged
    /// and never reach the visitor.
    pub async fn record_best_effort(&self, link_id: i64, client: &ClientInfo) {
        if let Err(e) = self.record(link_id, client).await {
            warn!(link_id, error = ?e, "failed to record click");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::geoip::UnknownGeoLookup;
    use crate::analytics::models::GeoLocation;
    use crate::models::NewLink;
    use crate::storage::SqliteStorage;

    struct FixedGeo;

    impl GeoLookup for FixedGeo {
        fn lookup(&self, _ip: IpAddr) -> GeoLocation {
            GeoLocation {
                country: Some("Iceland".to_string()),
                city: Some("Reykjavik".to_string()),
            }
        }
    }

    async fn setup(geo: Arc<dyn GeoLookup>) -> (ClickRecorder, Arc<dyn Storage>, i64) {
        let sqlite = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        sqlite.init().await.unwrap();
        let storage: Arc<dyn Storage> = Arc::new(sqlite);
        let link = storage
            .create_link(&NewLink {
                short_code: "rec".to_string(),
                original_url: "https://example.com".to_string(),
                owner_id: "alice".to_string(),
                title: None,
                description: None,
                tags: None,
                is_public: false,
                password: None,
                expires_at: None,
            })
            .await
            .unwrap();
        (ClickRecorder::new(Arc::clone(&storage), geo), storage, link.id)
    }

    #[tokio::test]
    async fn record_stores_click_and_increments() {
        let (recorder, storage, link_id) = setup(Arc::new(FixedGeo)).await;
        let client = ClientInfo {
            ip: Some("203.0.113.5".parse().unwrap()),
            user_agent: Some("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1".to_string()),
            referer: Some("https://www.google.com/".to_string()),
        };

        recorder.record(link_id, &client).await.unwrap();

        let clicks = storage.recent_clicks(link_id, 10).await.unwrap();
        assert_eq!(clicks.len(), 1);
        assert_eq!(clicks[0].ip_address.as_deref(), Some("203.0.113.5"));
        assert_eq!(clicks[0].country.as_deref(), Some("Iceland"));
        assert_eq!(clicks[0].city.as_deref(), Some("Reykjavik"));
        assert_eq!(clicks[0].device_type.as_deref(), Some("mobile"));
        assert_eq!(clicks[0].referer.as_deref(), Some("https://www.google.com/"));

        let link = storage.get_link(link_id).await.unwrap().unwrap();
        assert_eq!(link.click_count, 1);
    }

    #[tokio::test]
    async fn anonymous_client_still_counts() {
        let (recorder, storage, link_id) = setup(Arc::new(UnknownGeoLookup)).await;

        recorder.record(link_id, &ClientInfo::default()).await.unwrap();

        let clicks = storage.recent_clicks(link_id, 10).await.unwrap();
        assert_eq!(clicks[0].ip_address, None);
        assert_eq!(clicks[0].country, None);
        assert_eq!(clicks[0].device_type, None);
    }

    #[tokio::test]
    async fn best_effort_swallows_failures() {
        // Schema never created, so every write fails
        let sqlite = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        let storage: Arc<dyn Storage> = Arc::new(sqlite);
        let recorder = ClickRecorder::new(storage, Arc::new(UnknownGeoLookup));

        assert!(recorder.record(1, &ClientInfo::default()).await.is_err());
        recorder.record_best_effort(1, &ClientInfo::default()).await;
    }
}
