use crate::models::{Click, Link, LinkPatch, LinkQuery, NewClick, NewLink, OwnerStats};
use crate::storage::{Storage, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Storage wrapper that caches short code lookups for the redirect path.
///
/// Every write that can change what a short code resolves to invalidates the
/// entry, so a disabled or deleted link stops redirecting immediately. Click
/// writes go straight through: cached `click_count` values may lag, the
/// database copy never does.
pub struct CachedStorage {
    inner: Arc<dyn Storage>,
    read_cache: Cache<String, Link>,
}

impl CachedStorage {
    pub fn new(inner: Arc<dyn Storage>, max_cache_entries: u64, ttl_secs: u64) -> Self {
        let read_cache = Cache::builder()
            .max_capacity(max_cache_entries)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Self { inner, read_cache }
    }

    async fn invalidate_cache(&self, short_code: &str) {
        self.read_cache.invalidate(short_code).await;
    }
}

#[async_trait]
impl Storage for CachedStorage {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn create_link(&self, link: &NewLink) -> StorageResult<Link> {
        let created = self.inner.create_link(link).await?;

        self.read_cache
            .insert(created.short_code.clone(), created.clone())
            .await;

        Ok(created)
    }

    async fn get_link(&self, id: i64) -> Result<Option<Link>> {
        self.inner.get_link(id).await
    }

    async fn get_link_by_code(&self, short_code: &str) -> Result<Option<Link>> {
        if let Some(cached) = self.read_cache.get(short_code).await {
            return Ok(Some(cached));
        }

        let result = self.inner.get_link_by_code(short_code).await?;

        // Misses are not cached: a stale miss must not shadow a link that
        // create_link inserted meanwhile.
        if let Some(link) = &result {
            self.read_cache
                .insert(short_code.to_string(), link.clone())
                .await;
        }

        Ok(result)
    }

    async fn update_link(
        &self,
        id: i64,
        owner_id: &str,
        patch: &LinkPatch,
    ) -> Result<Option<Link>> {
        let updated = self.inner.update_link(id, owner_id, patch).await?;

        if let Some(link) = &updated {
            self.invalidate_cache(&link.short_code).await;
        }

        Ok(updated)
    }

    async fn toggle_link_active(&self, id: i64, owner_id: &str) -> Result<Option<Link>> {
        let toggled = self.inner.toggle_link_active(id, owner_id).await?;

        if let Some(link) = &toggled {
            self.invalidate_cache(&link.short_code).await;
        }

        Ok(toggled)
    }

    async fn delete_link(&self, id: i64, owner_id: &str) -> Result<bool> {
        let existing = self.inner.get_link(id).await?;
        let deleted = self.inner.delete_link(id, owner_id).await?;

        if deleted {
            if let Some(link) = existing {
                self.invalidate_cache(&link.short_code).await;
            }
        }

        Ok(deleted)
    }

    async fn list_links(&self, owner_id: &str, query: &LinkQuery) -> Result<Vec<Link>> {
        self.inner.list_links(owner_id, query).await
    }

    async fn count_links(&self, owner_id: &str, search: Option<&str>) -> Result<i64> {
        self.inner.count_links(owner_id, search).await
    }

    async fn owner_stats(&self, owner_id: &str) -> Result<OwnerStats> {
        self.inner.owner_stats(owner_id).await
    }

    async fn insert_click(&self, click: &NewClick) -> Result<i64> {
        self.inner.insert_click(click).await
    }

    async fn increment_clicks(&self, link_id: i64) -> Result<()> {
        self.inner.increment_clicks(link_id).await
    }

    async fn clicks_since(&self, link_id: i64, since: i64) -> Result<Vec<Click>> {
        self.inner.clicks_since(link_id, since).await
    }

    async fn recent_clicks(&self, link_id: i64, limit: i64) -> Result<Vec<Click>> {
        self.inner.recent_clicks(link_id, limit).await
    }

    async fn owner_clicks_since(&self, owner_id: &str, since: i64) -> Result<Vec<Click>> {
        self.inner.owner_clicks_since(owner_id, since).await
    }

    async fn owner_unique_visitors(&self, owner_id: &str) -> Result<i64> {
        self.inner.owner_unique_visitors(owner_id).await
    }
}
