use crate::models::{Click, Link, LinkOrder, LinkPatch, LinkQuery, NewClick, NewLink, OwnerStats};
use crate::storage::{
    like_pattern, patch_field, unix_now, Storage, StorageError, StorageResult, CLICK_COLUMNS,
    LINK_COLUMNS,
};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::sync::Arc;

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    async fn fetch_owned(&self, id: i64, owner_id: &str) -> Result<Option<Link>> {
        let link = sqlx::query_as::<_, Link>(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE id = ? AND owner_id = ?"
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(link)
    }
}

fn push_owner_filter(builder: &mut QueryBuilder<'_, Sqlite>, owner_id: &str, search: Option<&str>) {
    builder.push(" WHERE owner_id = ");
    builder.push_bind(owner_id.to_string());

    if let Some(term) = search.filter(|s| !s.trim().is_empty()) {
        let pattern = like_pattern(term.trim());
        builder.push(" AND (");
        for (i, column) in ["title", "description", "tags", "original_url"]
            .iter()
            .enumerate()
        {
            if i > 0 {
                builder.push(" OR ");
            }
            builder.push(*column);
            builder.push(" LIKE ");
            builder.push_bind(pattern.clone());
            builder.push(r" ESCAPE '\'");
        }
        builder.push(")");
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS links (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                short_code TEXT NOT NULL UNIQUE,
                original_url TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                title TEXT,
                description TEXT,
                tags TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                is_public INTEGER NOT NULL DEFAULT 0,
                password TEXT,
                expires_at INTEGER,
                click_count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_owner_created ON links(owner_id, created_at)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS clicks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                link_id INTEGER NOT NULL REFERENCES links(id) ON DELETE CASCADE,
                ip_address TEXT,
                user_agent TEXT,
                referer TEXT,
                country TEXT,
                city TEXT,
                device_type TEXT,
                browser TEXT,
                os TEXT,
                clicked_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_clicks_link_clicked ON clicks(link_id, clicked_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn create_link(&self, link: &NewLink) -> StorageResult<Link> {
        let now = unix_now();

        let result = sqlx::query(
            r#"
            INSERT INTO links (
                short_code, original_url, owner_id, title, description, tags,
                is_active, is_public, password, expires_at, click_count, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?, ?, 0, ?, ?)
            ON CONFLICT(short_code) DO NOTHING
            "#,
        )
        .bind(&link.short_code)
        .bind(&link.original_url)
        .bind(&link.owner_id)
        .bind(&link.title)
        .bind(&link.description)
        .bind(&link.tags)
        .bind(link.is_public)
        .bind(&link.password)
        .bind(link.expires_at)
        .bind(now)
        .bind(now)
        .execute(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }

        let created = sqlx::query_as::<_, Link>(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE id = ?"
        ))
        .bind(result.last_insert_rowid())
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        Ok(created)
    }

    async fn get_link(&self, id: i64) -> Result<Option<Link>> {
        let link = sqlx::query_as::<_, Link>(&format!("SELECT {LINK_COLUMNS} FROM links WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(link)
    }

    async fn get_link_by_code(&self, short_code: &str) -> Result<Option<Link>> {
        let link = sqlx::query_as::<_, Link>(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE short_code = ?"
        ))
        .bind(short_code)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(link)
    }

    async fn update_link(
        &self,
        id: i64,
        owner_id: &str,
        patch: &LinkPatch,
    ) -> Result<Option<Link>> {
        let (set_title, title) = patch_field(&patch.title);
        let (set_description, description) = patch_field(&patch.description);
        let (set_tags, tags) = patch_field(&patch.tags);
        let (set_password, password) = patch_field(&patch.password);
        let (set_expires_at, expires_at) = patch_field(&patch.expires_at);

        let result = sqlx::query(
            r#"
            UPDATE links SET
                title = CASE WHEN ? THEN ? ELSE title END,
                description = CASE WHEN ? THEN ? ELSE description END,
                tags = CASE WHEN ? THEN ? ELSE tags END,
                password = CASE WHEN ? THEN ? ELSE password END,
                expires_at = CASE WHEN ? THEN ? ELSE expires_at END,
                is_active = COALESCE(?, is_active),
                is_public = COALESCE(?, is_public),
                updated_at = ?
            WHERE id = ? AND owner_id = ?
            "#,
        )
        .bind(set_title)
        .bind(title)
        .bind(set_description)
        .bind(description)
        .bind(set_tags)
        .bind(tags)
        .bind(set_password)
        .bind(password)
        .bind(set_expires_at)
        .bind(expires_at)
        .bind(patch.is_active)
        .bind(patch.is_public)
        .bind(unix_now())
        .bind(id)
        .bind(owner_id)
        .execute(self.pool.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.fetch_owned(id, owner_id).await
    }

    async fn toggle_link_active(&self, id: i64, owner_id: &str) -> Result<Option<Link>> {
        let result = sqlx::query(
            r#"
            UPDATE links
            SET is_active = NOT is_active, updated_at = ?
            WHERE id = ? AND owner_id = ?
            "#,
        )
        .bind(unix_now())
        .bind(id)
        .bind(owner_id)
        .execute(self.pool.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.fetch_owned(id, owner_id).await
    }

    async fn delete_link(&self, id: i64, owner_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM clicks
            WHERE link_id IN (SELECT id FROM links WHERE id = ? AND owner_id = ?)
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM links WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_links(&self, owner_id: &str, query: &LinkQuery) -> Result<Vec<Link>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {LINK_COLUMNS} FROM links"));
        push_owner_filter(&mut builder, owner_id, query.search.as_deref());

        match query.order {
            LinkOrder::Newest => {
                if let Some(after) = query.after {
                    builder.push(" AND (created_at < ");
                    builder.push_bind(after.created_at);
                    builder.push(" OR (created_at = ");
                    builder.push_bind(after.created_at);
                    builder.push(" AND id < ");
                    builder.push_bind(after.id);
                    builder.push("))");
                }
                builder.push(" ORDER BY created_at DESC, id DESC");
            }
            LinkOrder::MostClicked => {
                builder.push(" ORDER BY click_count DESC, id DESC");
            }
        }

        builder.push(" LIMIT ");
        builder.push_bind(query.limit);
        if query.after.is_none() {
            builder.push(" OFFSET ");
            builder.push_bind(query.offset);
        }

        let links = builder
            .build_query_as::<Link>()
            .fetch_all(self.pool.as_ref())
            .await?;

        Ok(links)
    }

    async fn count_links(&self, owner_id: &str, search: Option<&str>) -> Result<i64> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM links");
        push_owner_filter(&mut builder, owner_id, search);

        let total = builder
            .build_query_scalar::<i64>()
            .fetch_one(self.pool.as_ref())
            .await?;

        Ok(total)
    }

    async fn owner_stats(&self, owner_id: &str) -> Result<OwnerStats> {
        let stats = sqlx::query_as::<_, OwnerStats>(
            r#"
            SELECT
                COUNT(*) AS total_links,
                COALESCE(SUM(click_count), 0) AS total_clicks,
                COALESCE(SUM(CASE WHEN is_active THEN 1 ELSE 0 END), 0) AS active_links
            FROM links
            WHERE owner_id = ?
            "#,
        )
        .bind(owner_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(stats)
    }

    async fn insert_click(&self, click: &NewClick) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO clicks (
                link_id, ip_address, user_agent, referer, country, city,
                device_type, browser, os, clicked_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(click.link_id)
        .bind(&click.ip_address)
        .bind(&click.user_agent)
        .bind(&click.referer)
        .bind(&click.country)
        .bind(&click.city)
        .bind(&click.device_type)
        .bind(&click.browser)
        .bind(&click.os)
        .bind(click.clicked_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn increment_clicks(&self, link_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE links
            SET click_count = click_count + 1
            WHERE id = ?
            "#,
        )
        .bind(link_id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn clicks_since(&self, link_id: i64, since: i64) -> Result<Vec<Click>> {
        let clicks = sqlx::query_as::<_, Click>(&format!(
            r#"
            SELECT {CLICK_COLUMNS}
            FROM clicks c
            WHERE c.link_id = ? AND c.clicked_at >= ?
            ORDER BY c.clicked_at ASC, c.id ASC
            "#
        ))
        .bind(link_id)
        .bind(since)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(clicks)
    }

    async fn recent_clicks(&self, link_id: i64, limit: i64) -> Result<Vec<Click>> {
        let clicks = sqlx::query_as::<_, Click>(&format!(
            r#"
            SELECT {CLICK_COLUMNS}
            FROM clicks c
            WHERE c.link_id = ?
            ORDER BY c.clicked_at DESC, c.id DESC
            LIMIT ?
            "#
        ))
        .bind(link_id)
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(clicks)
    }

    async fn owner_clicks_since(&self, owner_id: &str, since: i64) -> Result<Vec<Click>> {
        let clicks = sqlx::query_as::<_, Click>(&format!(
            r#"
            SELECT {CLICK_COLUMNS}
            FROM clicks c
            JOIN links l ON l.id = c.link_id
            WHERE l.owner_id = ? AND c.clicked_at >= ?
            ORDER BY c.clicked_at ASC, c.id ASC
            "#
        ))
        .bind(owner_id)
        .bind(since)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(clicks)
    }

    async fn owner_unique_visitors(&self, owner_id: &str) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(DISTINCT c.ip_address)
            FROM clicks c
            JOIN links l ON l.id = c.link_id
            WHERE l.owner_id = ? AND c.ip_address IS NOT NULL AND c.ip_address <> ''
            "#,
        )
        .bind(owner_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count)
    }
}
