use anyhow::Context;
use tracing::error;

use crate::errors::FieldError;

/// Minimum length of the ordinary account password.
pub const MIN_PASSWORD_LEN: usize = 6;
/// Minimum length of the admin password.
pub const MIN_ADMIN_PASSWORD_LEN: usize = 8;
/// bcrypt only reads the first 72 bytes.
pub const MAX_PASSWORD_LEN: usize = 72;

/// A bcrypt hash. Only produced by [`PasswordHasher::hash`] or loaded back
/// from the store, so plaintext can never be persisted by mistake.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordHash(String);

impl PasswordHash {
    pub(crate) fn from_stored(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PasswordHash(..)")
    }
}

/// bcrypt with a configured work factor. Hashing runs on the blocking pool.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub async fn hash(&self, plain: &str) -> anyhow::Result<PasswordHash> {
        let plain = plain.to_owned();
        let cost = self.cost;
        let hash = tokio::task::spawn_blocking(move || bcrypt::hash(plain, cost))
            .await
            .context("bcrypt hash task")?
            .map_err(|e| {
                error!(error = %e, "bcrypt hash error");
                anyhow::anyhow!(e)
            })?;
        Ok(PasswordHash(hash))
    }
}

/// Checks `candidate` against a stored hash. An empty slot never matches.
pub async fn verify_password(
    candidate: &str,
    stored: Option<&PasswordHash>,
) -> anyhow::Result<bool> {
    let Some(stored) = stored else {
        return Ok(false);
    };
    let candidate = candidate.to_owned();
    let hash = stored.0.clone();
    tokio::task::spawn_blocking(move || bcrypt::verify(candidate, &hash))
        .await
        .context("bcrypt verify task")?
        .map_err(|e| {
            error!(error = %e, "bcrypt verify error");
            anyhow::anyhow!(e)
        })
}

pub fn validate_password(
    field: &'static str,
    password: &str,
    min_len: usize,
) -> Result<(), FieldError> {
    if password.len() < min_len {
        return Err(FieldError::new(
            field,
            format!("Password must be at least {min_len} characters"),
        ));
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(FieldError::new(
            field,
            format!("Password must be at most {MAX_PASSWORD_LEN} characters"),
        ));
    }
    Ok(())
}
