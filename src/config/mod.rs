use anyhow::Context;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub redirect_server: ServerConfig,
    /// Public base URL that short codes are appended to (e.g. `https://s.example`)
    pub redirect_base_url: String,
    pub auth: AuthConfig,
    pub cache: CacheConfig,
    pub pagination: PaginationConfig,
    pub short_code: ShortCodeConfig,
    pub analytics: AnalyticsConfig,
    /// Allowed CORS origins for the API server; empty or `*` allows any origin
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    None,
    Jwt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub mode: AuthMode,
    #[serde(default)]
    pub jwt: Option<JwtConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    #[serde(default = "JwtConfig::default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

impl JwtConfig {
    const fn default_token_ttl_secs() -> u64 {
        // 24 hours
        86_400
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Disable the short-code read cache entirely when false
    pub enabled: bool,
    pub max_entries: u64,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    /// Secret for signing list cursors. A random key is generated when unset,
    /// which means cursors do not survive restarts.
    pub cursor_hmac_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortCodeConfig {
    pub length: usize,
    pub max_attempts: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    /// Use the socket address only
    None,
    /// Honour `Forwarded` / `X-Forwarded-For`
    Standard,
    /// Honour `CF-Connecting-IP`
    Cloudflare,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    pub geoip_city_db_path: Option<String>,
    pub ip_anonymization: bool,
    pub trusted_proxy_mode: TrustedProxyMode,
    #[serde(default)]
    pub trusted_proxies: Vec<IpNet>,
    pub num_trusted_proxies: Option<usize>,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            geoip_city_db_path: None,
            ip_anonymization: false,
            trusted_proxy_mode: TrustedProxyMode::None,
            trusted_proxies: Vec::new(),
            num_trusted_proxies: None,
        }
    }
}

impl Default for ShortCodeConfig {
    fn default() -> Self {
        Self {
            length: 6,
            max_attempts: 16,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                backend: DatabaseBackend::Sqlite,
                url: "sqlite://./shortlink.db?mode=rwc".to_string(),
                max_connections: 30,
            },
            api_server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            redirect_server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            redirect_base_url: "http://localhost:3000".to_string(),
            auth: AuthConfig {
                mode: AuthMode::None,
                jwt: None,
            },
            cache: CacheConfig {
                enabled: true,
                max_entries: 10_000,
                ttl_secs: 300,
            },
            pagination: PaginationConfig {
                cursor_hmac_secret: None,
            },
            short_code: ShortCodeConfig::default(),
            analytics: AnalyticsConfig::default(),
            cors_origins: Vec::new(),
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
}

fn env_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            _ => DatabaseBackend::Sqlite,
        };

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| defaults.database.url.clone());

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()
            .context("DATABASE_MAX_CONNECTIONS must be a positive integer")?
            .unwrap_or(defaults.database.max_connections);

        let api_host = std::env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let api_port = std::env::var("API_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .context("API_PORT must be a valid port")?;

        let redirect_host =
            std::env::var("REDIRECT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let redirect_port = std::env::var("REDIRECT_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("REDIRECT_PORT must be a valid port")?;

        let redirect_base_url = std::env::var("REDIRECT_BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{redirect_port}"))
            .trim_end_matches('/')
            .to_string();

        let auth_mode = match std::env::var("AUTH_MODE")
            .unwrap_or_else(|_| "none".to_string())
            .to_lowercase()
            .as_str()
        {
            "none" => AuthMode::None,
            "jwt" => AuthMode::Jwt,
            other => {
                tracing::warn!(
                    "Unknown AUTH_MODE '{other}', falling back to 'none'. Supported values: none, jwt"
                );
                AuthMode::None
            }
        };

        let jwt = if matches!(auth_mode, AuthMode::Jwt) {
            let secret =
                std::env::var("JWT_SECRET").context("JWT_SECRET must be set when AUTH_MODE=jwt")?;
            let token_ttl_secs = std::env::var("JWT_TOKEN_TTL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or_else(JwtConfig::default_token_ttl_secs);
            Some(JwtConfig {
                secret,
                token_ttl_secs,
            })
        } else {
            None
        };

        let cache = CacheConfig {
            enabled: env_flag("CACHE_ENABLED").unwrap_or(defaults.cache.enabled),
            max_entries: std::env::var("CACHE_MAX_ENTRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.cache.max_entries),
            ttl_secs: std::env::var("CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.cache.ttl_secs),
        };

        let short_code = ShortCodeConfig {
            length: std::env::var("SHORT_CODE_LENGTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|len| (3..=20).contains(len))
                .unwrap_or(defaults.short_code.length),
            max_attempts: std::env::var("SHORT_CODE_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.short_code.max_attempts),
        };

        let trusted_proxy_mode = match std::env::var("TRUSTED_PROXY_MODE")
            .unwrap_or_else(|_| "none".to_string())
            .to_lowercase()
            .as_str()
        {
            "standard" => TrustedProxyMode::Standard,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            _ => TrustedProxyMode::None,
        };

        let trusted_proxies = env_list("TRUSTED_PROXIES")
            .iter()
            .map(|cidr| {
                cidr.parse::<IpNet>()
                    .with_context(|| format!("invalid CIDR in TRUSTED_PROXIES: {cidr}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let analytics = AnalyticsConfig {
            geoip_city_db_path: std::env::var("GEOIP_CITY_DB_PATH").ok(),
            ip_anonymization: env_flag("ANALYTICS_IP_ANONYMIZATION").unwrap_or(false),
            trusted_proxy_mode,
            trusted_proxies,
            num_trusted_proxies: std::env::var("NUM_TRUSTED_PROXIES")
                .ok()
                .and_then(|v| v.parse().ok()),
        };

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            api_server: ServerConfig {
                host: api_host,
                port: api_port,
            },
            redirect_server: ServerConfig {
                host: redirect_host,
                port: redirect_port,
            },
            redirect_base_url,
            auth: AuthConfig {
                mode: auth_mode,
                jwt,
            },
            cache,
            pagination: PaginationConfig {
                cursor_hmac_secret: std::env::var("CURSOR_HMAC_SECRET").ok(),
            },
            short_code,
            analytics,
            cors_origins: env_list("CORS_ORIGINS"),
        })
    }
}
