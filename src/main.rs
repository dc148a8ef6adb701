use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shortlink::analytics::{build_geo_lookup, ClickRecorder};
use shortlink::auth::AuthService;
use shortlink::config::{AuthMode, Config, DatabaseBackend};
use shortlink::cursor::init_cursor_hmac_key;
use shortlink::storage::{CachedStorage, PostgresStorage, SqliteStorage, Storage};
use shortlink::{api, redirect};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;
    info!("Loaded configuration");

    let backend: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", config.database.url);
            Arc::new(
                SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
            )
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage");
            Arc::new(
                PostgresStorage::new(&config.database.url, config.database.max_connections)
                    .await?,
            )
        }
    };

    info!("Initializing database...");
    backend.init().await.context("failed to initialize database schema")?;
    info!("Database initialized successfully");

    let storage: Arc<dyn Storage> = if config.cache.enabled {
        info!(
            max_entries = config.cache.max_entries,
            ttl_secs = config.cache.ttl_secs,
            "Short code read cache enabled"
        );
        Arc::new(CachedStorage::new(
            backend,
            config.cache.max_entries,
            config.cache.ttl_secs,
        ))
    } else {
        backend
    };

    init_cursor_hmac_key(config.pagination.cursor_hmac_secret.as_deref());

    let auth_service = Arc::new(AuthService::new(&config.auth)?);
    match auth_service.mode() {
        AuthMode::None => {
            info!("Authentication is disabled - all API requests act as the local user");
        }
        AuthMode::Jwt => info!("JWT bearer authentication enabled"),
    }

    let geo = build_geo_lookup(config.analytics.geoip_city_db_path.as_deref())?;
    let recorder = Arc::new(ClickRecorder::new(Arc::clone(&storage), geo));

    let api_router = api::create_api_router(Arc::clone(&storage), auth_service, &config);
    let redirect_router =
        redirect::create_redirect_router(storage, recorder, config.analytics.clone());

    let api_addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr).await?;
    info!("API server listening on http://{}", api_addr);

    let redirect_addr = format!(
        "{}:{}",
        config.redirect_server.host, config.redirect_server.port
    );
    let redirect_listener = tokio::net::TcpListener::bind(&redirect_addr).await?;
    info!(
        "Redirect server listening on http://{} (short links: {}/<code>)",
        redirect_addr, config.redirect_base_url
    );

    tokio::try_join!(
        axum::serve(api_listener, api_router),
        axum::serve(
            redirect_listener,
            redirect_router.into_make_service_with_connect_info::<SocketAddr>()
        ),
    )?;

    Ok(())
}
