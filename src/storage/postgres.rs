use crate::models::{Click, Link, LinkOrder, LinkPatch, LinkQuery, NewClick, NewLink, OwnerStats};
use crate::storage::{
    like_pattern, patch_field, unix_now, Storage, StorageError, StorageResult, CLICK_COLUMNS,
    LINK_COLUMNS,
};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::sync::Arc;

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

fn push_owner_filter(
    builder: &mut QueryBuilder<'_, Postgres>,
    owner_id: &str,
    search: Option<&str>,
) {
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
            builder.push(" ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(r" ESCAPE '\'");
        }
        builder.push(")");
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS links (
                id BIGSERIAL PRIMARY KEY,
                short_code TEXT NOT NULL UNIQUE,
                original_url TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                title TEXT,
                description TEXT,
                tags TEXT,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                is_public BOOLEAN NOT NULL DEFAULT FALSE,
                password TEXT,
                expires_at BIGINT,
                click_count BIGINT NOT NULL DEFAULT 0,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL
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
                id BIGSERIAL PRIMARY KEY,
                link_id BIGINT NOT NULL REFERENCES links(id) ON DELETE CASCADE,
                ip_address TEXT,
                user_agent TEXT,
                referer TEXT,
                country TEXT,
                city TEXT,
                device_type TEXT,
                browser TEXT,
                os TEXT,
                clicked_at BIGINT NOT NULL
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

        let created = sqlx::query_as::<_, Link>(&format!(
            r#"
            INSERT INTO links (
                short_code, original_url, owner_id, title, description, tags,
                is_active, is_public, password, expires_at, click_count, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7, $8, $9, 0, $10, $10)
            ON CONFLICT (short_code) DO NOTHING
            RETURNING {LINK_COLUMNS}
            "#
        ))
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
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        created.ok_or(StorageError::Conflict)
    }

    async fn get_link(&self, id: i64) -> Result<Option<Link>> {
        let link = sqlx::query_as::<_, Link>(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(link)
    }

    async fn get_link_by_code(&self, short_code: &str) -> Result<Option<Link>> {
        let link = sqlx::query_as::<_, Link>(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE short_code = $1"
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

        let link = sqlx::query_as::<_, Link>(&format!(
            r#"
            UPDATE links SET
                title = CASE WHEN $1 THEN $2 ELSE title END,
                description = CASE WHEN $3 THEN $4 ELSE description END,
                tags = CASE WHEN $5 THEN $6 ELSE tags END,
                password = CASE WHEN $7 THEN $8 ELSE password END,
                expires_at = CASE WHEN $9 THEN $10 ELSE expires_at END,
                is_active = COALESCE($11, is_active),
                is_public = COALESCE($12, is_public),
                updated_at = $13
            WHERE id = $14 AND owner_id = $15
            RETURNING {LINK_COLUMNS}
            "#
        ))
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
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(link)
    }

    async fn toggle_link_active(&self, id: i64, owner_id: &str) -> Result<Option<Link>> {
        let link = sqlx::query_as::<_, Link>(&format!(
            r#"
            UPDATE links
            SET is_active = NOT is_active, updated_at = $1
            WHERE id = $2 AND owner_id = $3
            RETURNING {LINK_COLUMNS}
            "#
        ))
        .bind(unix_now())
        .bind(id)
        .bind(owner_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(link)
    }

    async fn delete_link(&self, id: i64, owner_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM clicks
            WHERE link_id IN (SELECT id FROM links WHERE id = $1 AND owner_id = $2)
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM links WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_links(&self, owner_id: &str, query: &LinkQuery) -> Result<Vec<Link>> {
        let mut builder =
            QueryBuilder::<Postgres>::new(format!("SELECT {LINK_COLUMNS} FROM links"));
        push_owner_filter(&mut builder, owner_id, query.search.as_deref());

        match query.order {
            LinkOrder::Newest => {
                if let Some(after) = query.after {
                    builder.push(" AND (created_at, id) < (");
                    builder.push_bind(after.created_at);
                    builder.push(", ");
                    builder.push_bind(after.id);
                    builder.push(")");
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
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM links");
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
                COALESCE(SUM(click_count), 0)::BIGINT AS total_clicks,
                COUNT(*) FILTER (WHERE is_active) AS active_links
            FROM links
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(stats)
    }

    async fn insert_click(&self, click: &NewClick) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO clicks (
                link_id, ip_address, user_agent, referer, country, city,
                device_type, browser, os, clicked_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
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
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(id)
    }

    async fn increment_clicks(&self, link_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE links
            SET click_count = click_count + 1
            WHERE id = $1
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
            WHERE c.link_id = $1 AND c.clicked_at >= $2
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
            WHERE c.link_id = $1
            ORDER BY c.clicked_at DESC, c.id DESC
            LIMIT $2
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
            WHERE l.owner_id = $1 AND c.clicked_at >= $2
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
            WHERE l.owner_id = $1 AND c.ip_address IS NOT NULL AND c.ip_address <> ''
            "#,
        )
        .bind(owner_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count)
    }
}
