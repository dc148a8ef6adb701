use anyhow::{bail, Context, Result};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::JwtConfig;
use crate::storage::unix_now;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

/// HS256 token minting and validation with a shared secret.
pub struct JwtValidator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    token_ttl_secs: i64,
}

impl JwtValidator {
    pub fn from_config(config: &JwtConfig) -> Result<Self> {
        if config.secret.is_empty() {
            bail!("JWT_SECRET must not be empty");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        validation.leeway = 0;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            token_ttl_secs: i64::try_from(config.token_ttl_secs).unwrap_or(i64::MAX),
        })
    }

    pub fn issue(&self, subject: &str) -> Result<String> {
        let now = unix_now();
        let claims = Claims {
            sub: subject.to_string(),
            iat: now,
            exp: now.saturating_add(self.token_ttl_secs),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to sign token")
    }

    pub fn validate(&self, token: &str) -> Result<Claims> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .context("token failed signature or structural validation")?;

        if data.claims.sub.is_empty() {
            bail!("token has an empty subject");
        }

        Ok(data.claims)
    }
}
