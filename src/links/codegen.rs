//! Short code generation and allocation.
//!
//! Codes are never checked for existence up front. The store's unique
//! constraint decides: a candidate is inserted directly and a conflict means
//! somebody else owns it.

use rand::RngExt;
use std::future::Future;

use crate::error::{AppError, AppResult};
use crate::storage::{StorageError, StorageResult};

pub const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

pub const MIN_CUSTOM_CODE_LEN: usize = 3;
pub const MAX_CUSTOM_CODE_LEN: usize = 20;

/// A random code of `length` characters drawn uniformly from [`ALPHABET`].
pub fn generate(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Check a caller supplied code against `[A-Za-z0-9_-]{3,20}`.
pub fn validate_custom_code(code: &str) -> AppResult<()> {
    let len = code.chars().count();
    if !(MIN_CUSTOM_CODE_LEN..=MAX_CUSTOM_CODE_LEN).contains(&len) {
        return Err(AppError::validation(format!(
            "Short code must be {MIN_CUSTOM_CODE_LEN}-{MAX_CUSTOM_CODE_LEN} characters"
        )));
    }

    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(AppError::validation(
            "Short code may only contain letters, digits, '_' and '-'",
        ));
    }

    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub struct CodeGenerator {
    length: usize,
    max_attempts: usize,
}

impl CodeGenerator {
    pub fn new(length: usize, max_attempts: usize) -> Self {
        Self {
            length,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Allocate a code by handing candidates to `register` until one sticks.
    ///
    /// A requested code is validated and tried exactly once; if `register`
    /// reports a conflict the caller gets [`AppError::CodeConflict`].
    /// Otherwise fresh candidates are generated until registration succeeds
    /// or `max_attempts` is reached ([`AppError::CodeSpaceExhausted`]).
    pub async fn allocate_unique<T, F, Fut>(
        &self,
        requested: Option<&str>,
        mut register: F,
    ) -> AppResult<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        if let Some(code) = requested {
            validate_custom_code(code)?;
            return match register(code.to_string()).await {
                Ok(value) => Ok(value),
                Err(StorageError::Conflict) => Err(AppError::CodeConflict(code.to_string())),
                Err(StorageError::Other(e)) => Err(AppError::Internal(e)),
            };
        }

        for attempt in 1..=self.max_attempts {
            let candidate = generate(self.length);
            match register(candidate.clone()).await {
                Ok(value) => return Ok(value),
                Err(StorageError::Conflict) => {
                    tracing::debug!(attempt, code = %candidate, "short code collision, retrying");
                }
                Err(StorageError::Other(e)) => return Err(AppError::Internal(e)),
            }
        }

        tracing::error!(
            attempts = self.max_attempts,
            length = self.length,
            "exhausted short code attempts"
        );
        Err(AppError::CodeSpaceExhausted(self.max_attempts))
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new(6, 16)
    }
}
