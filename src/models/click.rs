use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One recorded redirect. Rows are append-only.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Click {
    pub id: i64,
    pub link_id: i64,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub clicked_at: i64,
}

#[derive(Debug, Clone, Default)]
pub struct NewClick {
    pub link_id: i64,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub clicked_at: i64,
}
