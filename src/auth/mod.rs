pub mod jwt;

use anyhow::{bail, Result};
use axum::{
    extract::Request,
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::config::{AuthConfig, AuthMode};
use crate::error::AppError;

pub use jwt::{Claims, JwtValidator};

/// User id every request is attributed to when authentication is off.
pub const LOCAL_USER_ID: &str = "local";

/// The caller, as established by [`auth_middleware`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

pub struct AuthService {
    mode: AuthMode,
    jwt: Option<JwtValidator>,
}

impl AuthService {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        let jwt = match (&config.mode, &config.jwt) {
            (AuthMode::Jwt, Some(jwt_config)) => Some(JwtValidator::from_config(jwt_config)?),
            (AuthMode::Jwt, None) => bail!("AUTH_MODE=jwt requires JWT_SECRET"),
            (AuthMode::None, _) => None,
        };

        Ok(Self {
            mode: config.mode,
            jwt,
        })
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> Result<AuthenticatedUser, AppError> {
        let Some(jwt) = &self.jwt else {
            return Ok(AuthenticatedUser {
                user_id: LOCAL_USER_ID.to_string(),
            });
        };

        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AppError::Unauthorized)?;

        match jwt.validate(token) {
            Ok(claims) => Ok(AuthenticatedUser {
                user_id: claims.sub,
            }),
            Err(e) => {
                tracing::debug!(error = %e, "rejected bearer token");
                Err(AppError::Unauthorized)
            }
        }
    }

    /// Mint a bearer token for `subject`. Only available in JWT mode.
    pub fn issue_token(&self, subject: &str) -> Result<String> {
        match &self.jwt {
            Some(jwt) => jwt.issue(subject),
            None => bail!("tokens can only be issued when AUTH_MODE=jwt"),
        }
    }
}

pub async fn auth_middleware(
    auth_service: Arc<AuthService>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Response {
    match auth_service.authenticate(&headers) {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}
