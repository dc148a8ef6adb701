//! Opaque keyset cursors for link listings.
//!
//! A cursor is `base64url(json).base64url(hmac_sha256(payload))`. Clients
//! cannot forge a position, so a listing never leaks another owner's rows
//! through a crafted cursor.

use base64::prelude::*;
use hmac::{Hmac, Mac};
use rand::RngExt;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::OnceLock;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::models::Link;

static HMAC_KEY: OnceLock<Vec<u8>> = OnceLock::new();

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CursorError {
    #[error("malformed cursor")]
    Malformed,
    #[error("cursor signature verification failed")]
    BadSignature,
}

/// Install the signing key. Only the first call has an effect.
///
/// Without a secret a random key is generated, so cursors handed out before a
/// restart stop validating afterwards.
pub fn init_cursor_hmac_key(secret: Option<&str>) {
    HMAC_KEY.get_or_init(|| match secret {
        Some(s) => s.as_bytes().to_vec(),
        None => random_key(),
    });
}

fn random_key() -> Vec<u8> {
    let mut rng = rand::rng();
    (0..32).map(|_| rng.random::<u8>()).collect()
}

fn hmac_key() -> &'static [u8] {
    HMAC_KEY.get_or_init(random_key)
}

fn mac() -> Result<Hmac<Sha256>, hmac::digest::InvalidLength> {
    Hmac::<Sha256>::new_from_slice(hmac_key())
}

/// Position in a newest-first listing: the last row of the previous page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorData {
    pub created_at: i64,
    pub id: i64,
}

impl From<&Link> for CursorData {
    fn from(link: &Link) -> Self {
        Self {
            created_at: link.created_at,
            id: link.id,
        }
    }
}

pub fn encode_cursor(data: &CursorData) -> anyhow::Result<String> {
    let json = serde_json::to_vec(data)?;
    let payload = BASE64_URL_SAFE_NO_PAD.encode(json);

    let mut mac = mac().map_err(|e| anyhow::anyhow!("Failed to create HMAC: {e}"))?;
    mac.update(payload.as_bytes());
    let signature = BASE64_URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{payload}.{signature}"))
}

pub fn decode_cursor(cursor: &str) -> Result<CursorData, CursorError> {
    let (payload, signature_b64) = cursor.split_once('.').ok_or(CursorError::Malformed)?;
    if signature_b64.contains('.') {
        return Err(CursorError::Malformed);
    }

    let provided = BASE64_URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| CursorError::Malformed)?;

    let mut mac = mac().map_err(|_| CursorError::Malformed)?;
    mac.update(payload.as_bytes());
    let expected = mac.finalize().into_bytes();

    if !bool::from(expected.as_slice().ct_eq(&provided)) {
        return Err(CursorError::BadSignature);
    }

    let json = BASE64_URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| CursorError::Malformed)?;
    serde_json::from_slice(&json).map_err(|_| CursorError::Malformed)
}
