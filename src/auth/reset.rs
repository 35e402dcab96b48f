//! One-time password reset tokens.
//!
//! The raw token only ever leaves through the return value of [`issue`]; the
//! store keeps its SHA-256 digest and a deadline. Redemption is a single
//! conditional write, so a token cannot be spent twice.

use rand::RngCore;
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

use super::claims::AuthDomain;
use super::password::PasswordHasher;
use super::repo::UserStore;
use super::repo_types::{ResetTicket, User};
use crate::errors::ApiError;

pub const RESET_TOKEN_TTL: Duration = Duration::minutes(10);
const RESET_TOKEN_BYTES: usize = 32;

pub fn hash_reset_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

fn generate_raw_token() -> String {
    let mut bytes = [0u8; RESET_TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Stores a fresh ticket for `user` in `domain` and returns the raw token.
pub async fn issue(
    store: &dyn UserStore,
    user: &User,
    domain: AuthDomain,
    now: OffsetDateTime,
) -> anyhow::Result<String> {
    let raw = generate_raw_token();
    let ticket = ResetTicket {
        token_hash: hash_reset_token(&raw),
        expires_at: now + RESET_TOKEN_TTL,
    };
    store.set_reset_ticket(user.id, domain, Some(&ticket)).await?;
    info!(user_id = %user.id, domain = %domain, "reset token issued");
    Ok(raw)
}

/// Spends `raw` and sets the `domain` credential to `new_password`.
///
/// Unknown and expired tokens fail identically with
/// [`ApiError::InvalidResetToken`].
pub async fn redeem(
    store: &dyn UserStore,
    hasher: &PasswordHasher,
    domain: AuthDomain,
    raw: &str,
    new_password: &str,
    now: OffsetDateTime,
) -> Result<User, ApiError> {
    let token_hash = hash_reset_token(raw);
    if store
        .find_by_reset_hash(domain, &token_hash, now)
        .await?
        .is_none()
    {
        warn!(domain = %domain, "reset token rejected");
        return Err(ApiError::InvalidResetToken);
    }

    let hash = hasher.hash(new_password).await?;
    match store.redeem_reset(domain, &token_hash, &hash, now).await? {
        Some(user) => {
            info!(user_id = %user.id, domain = %domain, "reset token redeemed");
            Ok(user)
        }
        // spent or expired while hashing
        None => Err(ApiError::InvalidResetToken),
    }
}
