use crate::models::{Click, Link, LinkPatch, LinkQuery, NewClick, NewLink, OwnerStats};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("short code already exists")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;

    /// Insert a link. The unique constraint on `short_code` is the only
    /// arbiter of code uniqueness: a taken code yields `StorageError::Conflict`
    /// and nothing is written.
    async fn create_link(&self, link: &NewLink) -> StorageResult<Link>;

    async fn get_link(&self, id: i64) -> Result<Option<Link>>;

    async fn get_link_by_code(&self, short_code: &str) -> Result<Option<Link>>;

    /// Apply a patch to a link owned by `owner_id`. Returns `None` when the
    /// link does not exist or belongs to someone else.
    async fn update_link(
        &self,
        id: i64,
        owner_id: &str,
        patch: &LinkPatch,
    ) -> Result<Option<Link>>;

    /// Flip `is_active` on a link owned by `owner_id`.
    async fn toggle_link_active(&self, id: i64, owner_id: &str) -> Result<Option<Link>>;

    /// Delete a link owned by `owner_id` together with all of its clicks.
    async fn delete_link(&self, id: i64, owner_id: &str) -> Result<bool>;

    async fn list_links(&self, owner_id: &str, query: &LinkQuery) -> Result<Vec<Link>>;

    /// Total number of links matching the same filter as `list_links`,
    /// ignoring pagination.
    async fn count_links(&self, owner_id: &str, search: Option<&str>) -> Result<i64>;

    async fn owner_stats(&self, owner_id: &str) -> Result<OwnerStats>;

    /// Append a click row and return its id
    async fn insert_click(&self, click: &NewClick) -> Result<i64>;

    /// Increment click count by exactly one (row-atomic)
    async fn increment_clicks(&self, link_id: i64) -> Result<()>;

    /// Clicks for a link with `clicked_at >= since`, oldest first
    async fn clicks_since(&self, link_id: i64, since: i64) -> Result<Vec<Click>>;

    /// Most recent clicks for a link, newest first
    async fn recent_clicks(&self, link_id: i64, limit: i64) -> Result<Vec<Click>>;

    /// Clicks across every link owned by `owner_id` with `clicked_at >= since`
    async fn owner_clicks_since(&self, owner_id: &str, since: i64) -> Result<Vec<Click>>;

    /// Distinct non-empty visitor IPs across every link owned by `owner_id`
    async fn owner_unique_visitors(&self, owner_id: &str) -> Result<i64>;
}
