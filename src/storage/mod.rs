pub mod cached;
pub mod postgres;
pub mod sqlite;
pub mod trait_def;

pub use cached::CachedStorage;
pub use postgres::PostgresStorage;
pub use sqlite::SqliteStorage;
pub use trait_def::{Storage, StorageError, StorageResult};

pub(crate) const LINK_COLUMNS: &str = "id, short_code, original_url, owner_id, title, description, \
     tags, is_active, is_public, password, expires_at, click_count, created_at, updated_at";

pub(crate) const CLICK_COLUMNS: &str = "c.id, c.link_id, c.ip_address, c.user_agent, c.referer, \
     c.country, c.city, c.device_type, c.browser, c.os, c.clicked_at";

/// Current time as Unix seconds
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Split a nullable patch field into `(present, value)` bind parameters.
pub(crate) fn patch_field<T: Clone>(field: &Option<Option<T>>) -> (bool, Option<T>) {
    match field {
        Some(value) => (true, value.clone()),
        None => (false, None),
    }
}

/// `LIKE` pattern for a free-text search term
pub(crate) fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}
