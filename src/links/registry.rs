use serde::Serialize;
use std::sync::Arc;
use url::Url;

use crate::cursor::{decode_cursor, encode_cursor, CursorData};
use crate::error::{AppError, AppResult};
use crate::links::codegen::CodeGenerator;
use crate::models::{CreateLinkRequest, Link, LinkOrder, LinkPatch, LinkQuery, NewLink, OwnerStats};
use crate::storage::{unix_now, Storage};

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_BATCH_SIZE: usize = 100;
pub const MAX_PAGE_SIZE: i64 = 100;
pub const MAX_RECENT_LIMIT: i64 = 20;
pub const MAX_POPULAR_LIMIT: i64 = 50;

/// Prefix a bare host with `https://` and require an absolute http(s) URL.
///
/// The returned string is what gets stored and redirected to; it is not
/// re-serialised through the parser.
pub fn normalize_url(raw: &str) -> AppResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation("URL cannot be empty"));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let parsed = Url::parse(&candidate)
        .map_err(|_| AppError::validation(format!("Invalid URL: {trimmed}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AppError::validation("Only http and https URLs can be shortened"));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(AppError::validation(format!("Invalid URL: {trimmed}")));
    }

    Ok(candidate)
}

fn validate_title(title: Option<&str>) -> AppResult<()> {
    if title.is_some_and(|t| t.chars().count() > MAX_TITLE_LEN) {
        return Err(AppError::validation(format!(
            "Title must be at most {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(())
}

/// Listing parameters as they arrive from a client.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub search: Option<String>,
    pub skip: i64,
    pub limit: i64,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkPage {
    pub items: Vec<Link>,
    pub total: i64,
    pub skip: i64,
    pub limit: i64,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub created: Vec<Link>,
    pub failed: Vec<BatchFailure>,
}

/// Owns the short code to link mapping and the lifecycle rules around it.
pub struct LinkRegistry {
    storage: Arc<dyn Storage>,
    codes: CodeGenerator,
}

impl LinkRegistry {
    pub fn new(storage: Arc<dyn Storage>, codes: CodeGenerator) -> Self {
        Self { storage, codes }
    }

    pub async fn create(&self, owner_id: &str, request: CreateLinkRequest) -> AppResult<Link> {
        let original_url = normalize_url(&request.original_url)?;
        validate_title(request.title.as_deref())?;

        // Validated as sent; only an empty string counts as absent
        let requested = request
            .short_code
            .as_deref()
            .filter(|code| !code.is_empty());

        let template = NewLink {
            short_code: String::new(),
            original_url,
            owner_id: owner_id.to_string(),
            title: request.title,
            description: request.description,
            tags: request.tags,
            is_public: request.is_public,
            password: request.password,
            expires_at: request.expires_at,
        };

        let link = self.register(requested, template).await?;

        tracing::info!(
            link_id = link.id,
            short_code = %link.short_code,
            owner_id = %link.owner_id,
            "created link"
        );

        Ok(link)
    }

    async fn register(&self, requested: Option<&str>, template: NewLink) -> AppResult<Link> {
        self.codes
            .allocate_unique(requested, |short_code| {
                let storage = Arc::clone(&self.storage);
                let new_link = NewLink {
                    short_code,
                    ..template.clone()
                };
                async move { storage.create_link(&new_link).await }
            })
            .await
    }

    /// Create one link per URL with generated codes. Each URL succeeds or
    /// fails on its own.
    pub async fn create_batch(&self, owner_id: &str, urls: Vec<String>) -> AppResult<BatchOutcome> {
        if urls.is_empty() {
            return Err(AppError::validation("At least one URL is required"));
        }
        if urls.len() > MAX_BATCH_SIZE {
            return Err(AppError::validation(format!(
                "At most {MAX_BATCH_SIZE} URLs can be created at once"
            )));
        }

        let mut outcome = BatchOutcome::default();

        for url in urls {
            let result = match normalize_url(&url) {
                Ok(original_url) => {
                    let template = NewLink {
                        short_code: String::new(),
                        original_url,
                        owner_id: owner_id.to_string(),
                        title: None,
                        description: None,
                        tags: None,
                        is_public: false,
                        password: None,
                        expires_at: None,
                    };
                    self.register(None, template).await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(link) => outcome.created.push(link),
                Err(AppError::Internal(e)) => {
                    tracing::error!(error = ?e, url = %url, "batch link creation failed");
                    outcome.failed.push(BatchFailure {
                        url,
                        error: "Internal server error".to_string(),
                    });
                }
                Err(e) => outcome.failed.push(BatchFailure {
                    url,
                    error: e.to_string(),
                }),
            }
        }

        tracing::info!(
            owner_id = %owner_id,
            created = outcome.created.len(),
            failed = outcome.failed.len(),
            "batch create finished"
        );

        Ok(outcome)
    }

    /// Resolve a short code for redirection.
    pub async fn resolve(&self, short_code: &str) -> AppResult<Link> {
        self.resolve_at(short_code, unix_now()).await
    }

    pub async fn resolve_at(&self, short_code: &str, now: i64) -> AppResult<Link> {
        let link = self.lookup(short_code).await?;

        if !link.is_active {
            return Err(AppError::Disabled);
        }
        if link.is_expired_at(now) {
            return Err(AppError::Expired);
        }

        Ok(link)
    }

    /// Fetch a link by code regardless of its state.
    pub async fn lookup(&self, short_code: &str) -> AppResult<Link> {
        self.storage
            .get_link_by_code(short_code)
            .await?
            .ok_or(AppError::NotFound)
    }

    pub async fn get(&self, id: i64, owner_id: &str) -> AppResult<Link> {
        self.storage
            .get_link(id)
            .await?
            .filter(|link| link.owner_id == owner_id)
            .ok_or(AppError::NotFound)
    }

    pub async fn update(&self, id: i64, owner_id: &str, patch: LinkPatch) -> AppResult<Link> {
        if let Some(title) = &patch.title {
            validate_title(title.as_deref())?;
        }

        if patch.is_empty() {
            return self.get(id, owner_id).await;
        }

        let link = self
            .storage
            .update_link(id, owner_id, &patch)
            .await?
            .ok_or(AppError::NotFound)?;

        tracing::info!(link_id = id, owner_id = %owner_id, "updated link");
        Ok(link)
    }

    pub async fn toggle_status(&self, id: i64, owner_id: &str) -> AppResult<Link> {
        let link = self
            .storage
            .toggle_link_active(id, owner_id)
            .await?
            .ok_or(AppError::NotFound)?;

        tracing::info!(
            link_id = id,
            is_active = link.is_active,
            "toggled link status"
        );
        Ok(link)
    }

    /// Delete a link and its clicks. `false` when nothing owned by
    /// `owner_id` matched.
    pub async fn delete(&self, id: i64, owner_id: &str) -> AppResult<bool> {
        let deleted = self.storage.delete_link(id, owner_id).await?;
        if deleted {
            tracing::info!(link_id = id, owner_id = %owner_id, "deleted link");
        }
        Ok(deleted)
    }

    pub async fn list(&self, owner_id: &str, options: ListOptions) -> AppResult<LinkPage> {
        if !(1..=MAX_PAGE_SIZE).contains(&options.limit) {
            return Err(AppError::validation(format!(
                "limit must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        if options.skip < 0 {
            return Err(AppError::validation("skip must not be negative"));
        }

        let after = options
            .cursor
            .as_deref()
            .map(decode_cursor)
            .transpose()
            .map_err(|_| AppError::validation("Invalid cursor"))?;

        let search = options
            .search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let query = LinkQuery {
            search: search.clone(),
            order: LinkOrder::Newest,
            limit: options.limit,
            offset: options.skip,
            after,
        };

        let items = self.storage.list_links(owner_id, &query).await?;
        let total = self.storage.count_links(owner_id, search.as_deref()).await?;

        let next_cursor = match items.last() {
            Some(last) if items.len() as i64 == options.limit => {
                Some(encode_cursor(&CursorData::from(last))?)
            }
            _ => None,
        };

        Ok(LinkPage {
            items,
            total,
            skip: options.skip,
            limit: options.limit,
            next_cursor,
        })
    }

    pub async fn recent(&self, owner_id: &str, limit: i64) -> AppResult<Vec<Link>> {
        self.top(owner_id, LinkOrder::Newest, limit, MAX_RECENT_LIMIT)
            .await
    }

    pub async fn popular(&self, owner_id: &str, limit: i64) -> AppResult<Vec<Link>> {
        self.top(owner_id, LinkOrder::MostClicked, limit, MAX_POPULAR_LIMIT)
            .await
    }

    async fn top(
        &self,
        owner_id: &str,
        order: LinkOrder,
        limit: i64,
        max: i64,
    ) -> AppResult<Vec<Link>> {
        if !(1..=max).contains(&limit) {
            return Err(AppError::validation(format!(
                "limit must be between 1 and {max}"
            )));
        }

        let query = LinkQuery {
            order,
            limit,
            ..LinkQuery::default()
        };

        Ok(self.storage.list_links(owner_id, &query).await?)
    }

    pub async fn stats(&self, owner_id: &str) -> AppResult<OwnerStats> {
        Ok(self.storage.owner_stats(owner_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewClick;
    use crate::storage::SqliteStorage;

    async fn registry() -> (LinkRegistry, Arc<dyn Storage>) {
        let sqlite = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        sqlite.init().await.unwrap();
        let storage: Arc<dyn Storage> = Arc::new(sqlite);
        (
            LinkRegistry::new(Arc::clone(&storage), CodeGenerator::default()),
            storage,
        )
    }

    fn request(url: &str) -> CreateLinkRequest {
        CreateLinkRequest {
            original_url: url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn normalize_url_prefixes_scheme() {
        assert_eq!(normalize_url("example.com").unwrap(), "https://example.com");
        assert_eq!(
            normalize_url("  http://example.com/a?b=1 ").unwrap(),
            "http://example.com/a?b=1"
        );
        assert!(normalize_url("").is_err());
        assert!(normalize_url("ftp://example.com").is_err());
        assert!(normalize_url("https://").is_err());
        assert!(normalize_url("not a url").is_err());
    }

    #[tokio::test]
    async fn create_then_resolve_returns_same_url() {
        let (registry, _) = registry().await;
        let mut req = request("https://example.com/page");
        req.short_code = Some("mycode".to_string());

        let created = registry.create("alice", req).await.unwrap();
        assert_eq!(created.short_code, "mycode");

        let resolved = registry.resolve("mycode").await.unwrap();
        assert_eq!(resolved.original_url, "https://example.com/page");
        assert_eq!(resolved.id, created.id);
    }

    #[tokio::test]
    async fn generated_code_uses_configured_length() {
        let (registry, _) = registry().await;
        let link = registry.create("alice", request("example.com")).await.unwrap();
        assert_eq!(link.short_code.len(), 6);
        assert!(link.short_code.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(link.original_url, "https://example.com");
    }

    #[tokio::test]
    async fn taken_custom_code_is_a_conflict() {
        let (registry, _) = registry().await;
        let mut req = request("https://a.example");
        req.short_code = Some("same".to_string());
        registry.create("alice", req.clone()).await.unwrap();

        let err = registry.create("bob", req).await.unwrap_err();
        assert!(matches!(err, AppError::CodeConflict(_)));
    }

    #[tokio::test]
    async fn padded_or_blank_custom_code_is_rejected() {
        let (registry, storage) = registry().await;

        for code in ["  abc  ", "   "] {
            let mut req = request("https://example.com");
            req.short_code = Some(code.to_string());
            assert!(
                matches!(
                    registry.create("alice", req).await,
                    Err(AppError::Validation(_))
                ),
                "custom code {code:?} should be rejected"
            );
        }

        assert!(storage.get_link_by_code("abc").await.unwrap().is_none());
        assert_eq!(storage.count_links("alice", None).await.unwrap(), 0);

        let mut req = request("https://example.com");
        req.short_code = Some(String::new());
        let link = registry.create("alice", req).await.unwrap();
        assert_eq!(link.short_code.len(), 6);
    }

    #[tokio::test]
    async fn overlong_title_is_rejected() {
        let (registry, _) = registry().await;
        let mut req = request("https://example.com");
        req.title = Some("x".repeat(MAX_TITLE_LEN + 1));
        assert!(matches!(
            registry.create("alice", req).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn resolve_state_machine() {
        let (registry, _) = registry().await;

        assert!(matches!(
            registry.resolve("missing").await,
            Err(AppError::NotFound)
        ));

        let mut req = request("https://example.com");
        req.short_code = Some("expiring".to_string());
        req.expires_at = Some(1_000);
        registry.create("alice", req).await.unwrap();

        // Still valid during the expiry second itself
        assert!(registry.resolve_at("expiring", 1_000).await.is_ok());
        assert!(matches!(
            registry.resolve_at("expiring", 1_001).await,
            Err(AppError::Expired)
        ));

        let mut req = request("https://example.com");
        req.short_code = Some("toggled".to_string());
        let link = registry.create("alice", req).await.unwrap();
        registry.toggle_status(link.id, "alice").await.unwrap();
        assert!(matches!(
            registry.resolve("toggled").await,
            Err(AppError::Disabled)
        ));

        // Preview ignores state
        assert!(!registry.lookup("toggled").await.unwrap().is_active);
    }

    #[tokio::test]
    async fn foreign_owner_sees_not_found() {
        let (registry, _) = registry().await;
        let link = registry.create("alice", request("https://example.com")).await.unwrap();

        assert!(matches!(registry.get(link.id, "bob").await, Err(AppError::NotFound)));
        assert!(matches!(
            registry.update(link.id, "bob", LinkPatch::default()).await,
            Err(AppError::NotFound)
        ));
        assert!(matches!(
            registry.toggle_status(link.id, "bob").await,
            Err(AppError::NotFound)
        ));
        assert!(!registry.delete(link.id, "bob").await.unwrap());
        assert!(registry.get(link.id, "alice").await.is_ok());
    }

    #[tokio::test]
    async fn patch_sets_and_clears_fields() {
        let (registry, _) = registry().await;
        let mut req = request("https://example.com");
        req.title = Some("Old".to_string());
        req.description = Some("keep me".to_string());
        let link = registry.create("alice", req).await.unwrap();

        let patch: LinkPatch =
            serde_json::from_str(r#"{"title": null, "tags": "a,b", "is_public": true}"#).unwrap();
        let updated = registry.update(link.id, "alice", patch).await.unwrap();

        assert_eq!(updated.title, None);
        assert_eq!(updated.description.as_deref(), Some("keep me"));
        assert_eq!(updated.tags.as_deref(), Some("a,b"));
        assert!(updated.is_public);
        assert_eq!(updated.short_code, link.short_code);
    }

    #[tokio::test]
    async fn delete_removes_clicks() {
        let (registry, storage) = registry().await;
        let link = registry.create("alice", request("https://example.com")).await.unwrap();
        storage
            .insert_click(&NewClick {
                link_id: link.id,
                clicked_at: unix_now(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(registry.delete(link.id, "alice").await.unwrap());
        assert!(storage.recent_clicks(link.id, 10).await.unwrap().is_empty());
        assert!(matches!(
            registry.resolve(&link.short_code).await,
            Err(AppError::NotFound)
        ));
    }

    #[tokio::test]
    async fn batch_reports_per_url_failures() {
        let (registry, _) = registry().await;
        let outcome = registry
            .create_batch(
                "alice",
                vec![
                    "https://a.example".to_string(),
                    "ftp://nope.example".to_string(),
                    "b.example".to_string(),
                ],
            )
            .await
            .unwrap();

        assert_eq!(outcome.created.len(), 2);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].url, "ftp://nope.example");
        assert_ne!(outcome.created[0].short_code, outcome.created[1].short_code);
    }

    #[tokio::test]
    async fn batch_size_is_bounded() {
        let (registry, _) = registry().await;
        assert!(registry.create_batch("alice", vec![]).await.is_err());

        let urls = vec!["https://example.com".to_string(); MAX_BATCH_SIZE + 1];
        assert!(matches!(
            registry.create_batch("alice", urls).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn list_paginates_with_total_and_cursor() {
        crate::cursor::init_cursor_hmac_key(Some("registry-test-key"));
        let (registry, _) = registry().await;
        for i in 0..5 {
            let mut req = request(&format!("https://example.com/{i}"));
            req.title = Some(format!("page {i}"));
            registry.create("alice", req).await.unwrap();
        }
        registry.create("bob", request("https://example.com/bob")).await.unwrap();

        let first = registry
            .list(
                "alice",
                ListOptions {
                    limit: 2,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(first.total, 5);
        assert_eq!(first.items.len(), 2);
        let cursor = first.next_cursor.clone().unwrap();

        let second = registry
            .list(
                "alice",
                ListOptions {
                    limit: 2,
                    cursor: Some(cursor),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(second.items.len(), 2);
        assert!(second
            .items
            .iter()
            .all(|l| first.items.iter().all(|f| f.id != l.id)));

        let searched = registry
            .list(
                "alice",
                ListOptions {
                    limit: 20,
                    search: Some("page 3".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(searched.total, 1);
        assert_eq!(searched.next_cursor, None);
    }

    #[tokio::test]
    async fn list_rejects_bad_parameters() {
        let (registry, _) = registry().await;
        let bad_limit = ListOptions {
            limit: 0,
            ..Default::default()
        };
        assert!(registry.list("alice", bad_limit).await.is_err());

        let bad_cursor = ListOptions {
            limit: 10,
            cursor: Some("garbage".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            registry.list("alice", bad_cursor).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn popular_orders_by_clicks() {
        let (registry, storage) = registry().await;
        let quiet = registry.create("alice", request("https://quiet.example")).await.unwrap();
        let busy = registry.create("alice", request("https://busy.example")).await.unwrap();
        for _ in 0..3 {
            storage.increment_clicks(busy.id).await.unwrap();
        }

        let popular = registry.popular("alice", 10).await.unwrap();
        assert_eq!(popular[0].id, busy.id);
        assert_eq!(popular[1].id, quiet.id);

        assert!(registry.recent("alice", 21).await.is_err());
        assert!(registry.popular("alice", 51).await.is_err());

        let stats = registry.stats("alice").await.unwrap();
        assert_eq!(stats.total_links, 2);
        assert_eq!(stats.total_clicks, 3);
        assert_eq!(stats.active_links, 2);
    }
}
