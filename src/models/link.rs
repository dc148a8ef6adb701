use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;

use crate::cursor::CursorData;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Link {
    pub id: i64,
    pub short_code: String,
    pub original_url: String,
    pub owner_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Comma separated tags
    pub tags: Option<String>,
    pub is_active: bool,
    pub is_public: bool,
    #[serde(skip_serializing, default)]
    pub password: Option<String>,
    pub expires_at: Option<i64>,
    pub click_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Link {
    /// A link expires strictly after its `expires_at` second has passed.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }
}

/// A fully validated link ready to be inserted.
#[derive(Debug, Clone)]
pub struct NewLink {
    pub short_code: String,
    pub original_url: String,
    pub owner_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<String>,
    pub is_public: bool,
    pub password: Option<String>,
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateLinkRequest {
    #[serde(alias = "url")]
    pub original_url: String,
    #[serde(default)]
    pub short_code: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchCreateRequest {
    pub urls: Vec<String>,
}

/// The mutable subset of a link.
///
/// Nullable columns use a double option so that an explicit JSON `null`
/// clears the value while an absent key leaves it untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkPatch {
    #[serde(default, deserialize_with = "double_option")]
    pub title: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub tags: Option<Option<String>>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub is_public: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub password: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub expires_at: Option<Option<i64>>,
}

impl LinkPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.tags.is_none()
            && self.is_active.is_none()
            && self.is_public.is_none()
            && self.password.is_none()
            && self.expires_at.is_none()
    }
}

fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkOrder {
    #[default]
    Newest,
    MostClicked,
}

/// Filters and pagination for listing an owner's links.
#[derive(Debug, Clone)]
pub struct LinkQuery {
    pub search: Option<String>,
    pub order: LinkOrder,
    pub limit: i64,
    pub offset: i64,
    /// Keyset position; only honoured with [`LinkOrder::Newest`]
    pub after: Option<CursorData>,
}

impl Default for LinkQuery {
    fn default() -> Self {
        Self {
            search: None,
            order: LinkOrder::Newest,
            limit: 20,
            offset: 0,
            after: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, FromRow)]
pub struct OwnerStats {
    pub total_links: i64,
    pub total_clicks: i64,
    pub active_links: i64,
}

/// Public view of a link, served without authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkPreview {
    pub original_url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_active: bool,
    pub expires_at: Option<i64>,
    pub created_at: i64,
}

impl From<&Link> for LinkPreview {
    fn from(link: &Link) -> Self {
        Self {
            original_url: link.original_url.clone(),
            title: link.title.clone(),
            description: link.description.clone(),
            is_active: link.is_active,
            expires_at: link.expires_at,
            created_at: link.created_at,
        }
    }
}
