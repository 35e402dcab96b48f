//! Request authentication and authorization.
//!
//! Every protected route goes through [`authorize`] with an explicit
//! [`Requirement`]. The checks run in a fixed order: extract, verify
//! signature, resolve user, active flag (standard), role, staleness and
//! admin password presence (elevated). The first failure wins.

use axum::{
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{error, warn};

use super::claims::AuthDomain;
use super::repo_types::{PublicUser, Role, User};
use crate::errors::error_response;
use crate::state::AppState;

pub const MEMBER_COOKIE: &str = "token";
pub const ADMIN_COOKIE: &str = "admin_token";

/// What a route demands of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Standard,
    Elevated,
    /// Standard session first, elevated session with the same token second.
    Either,
}

/// A verified caller.
#[derive(Debug, Clone)]
pub struct Session {
    pub domain: AuthDomain,
    pub user: User,
    pub issued_at: i64,
}

impl Session {
    pub fn public(&self) -> PublicUser {
        PublicUser::from(&self.user)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no credentials presented")]
    MissingToken,
    #[error("token failed verification")]
    InvalidToken,
    #[error("token subject not found")]
    UnknownUser,
    #[error("account inactive")]
    Inactive,
    #[error("admin role required")]
    NotAdmin,
    #[error("admin token predates password change")]
    StaleToken,
    #[error("admin password not set")]
    AdminPasswordNotSet,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            AuthError::MissingToken
            | AuthError::InvalidToken
            | AuthError::UnknownUser
            | AuthError::Inactive => {
                error_response(StatusCode::UNAUTHORIZED, "Not authenticated", None)
            }
            AuthError::StaleToken => error_response(
                StatusCode::UNAUTHORIZED,
                "Admin password changed, please log in again",
                None,
            ),
            AuthError::NotAdmin => {
                error_response(StatusCode::FORBIDDEN, "Admin access required", None)
            }
            AuthError::AdminPasswordNotSet => {
                error_response(StatusCode::FORBIDDEN, "Admin password not set", None)
            }
            AuthError::Store(e) => {
                error!(error = ?e, "user lookup failed during authentication");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
        }
    }
}

/// Bearer header first, then the cookie belonging to `requirement`.
pub fn extract_token(headers: &HeaderMap, requirement: Requirement) -> Option<String> {
    let from_header = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = from_header {
        return Some(token.to_owned());
    }

    let jar = CookieJar::from_headers(headers);
    let cookie = |name: &str| {
        jar.get(name)
            .map(|c| c.value().to_owned())
            .filter(|v| !v.is_empty())
    };
    match requirement {
        Requirement::Standard => cookie(MEMBER_COOKIE),
        Requirement::Elevated => cookie(ADMIN_COOKIE),
        Requirement::Either => cookie(MEMBER_COOKIE).or_else(|| cookie(ADMIN_COOKIE)),
    }
}

/// Verifies `token` against one domain and resolves the user.
pub async fn verify(
    state: &AppState,
    token: &str,
    domain: AuthDomain,
) -> Result<Session, AuthError> {
    let claims = state.tokens.verify(token, domain).map_err(|e| {
        warn!(domain = %domain, error = %e, "token rejected");
        AuthError::InvalidToken
    })?;

    let user = state
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| {
            warn!(user_id = %claims.sub, domain = %domain, "token subject not found");
            AuthError::UnknownUser
        })?;

    match domain {
        AuthDomain::Standard => {
            if !user.is_active {
                warn!(user_id = %user.id, "inactive account presented a token");
                return Err(AuthError::Inactive);
            }
        }
        AuthDomain::Elevated => {
            if user.role != Role::Admin {
                warn!(user_id = %user.id, role = user.role.as_str(), "admin token for non-admin");
                return Err(AuthError::NotAdmin);
            }
            if user.admin_token_is_stale(claims.iat_us) {
                warn!(user_id = %user.id, "stale admin token");
                return Err(AuthError::StaleToken);
            }
            if user.admin_password_hash.is_none() {
                warn!(user_id = %user.id, "admin token but admin password unset");
                return Err(AuthError::AdminPasswordNotSet);
            }
        }
    }

    Ok(Session {
        domain,
        user,
        issued_at: claims.iat,
    })
}

/// Runs the whole check for `requirement` and returns one outcome.
pub async fn authorize(
    state: &AppState,
    token: Option<&str>,
    requirement: Requirement,
) -> Result<Session, AuthError> {
    let token = token.ok_or(AuthError::MissingToken)?;
    match requirement {
        Requirement::Standard => verify(state, token, AuthDomain::Standard).await,
        Requirement::Elevated => verify(state, token, AuthDomain::Elevated).await,
        Requirement::Either => match verify(state, token, AuthDomain::Standard).await {
            Ok(session) => Ok(session),
            Err(e @ AuthError::Store(_)) => Err(e),
            Err(standard_err) => match verify(state, token, AuthDomain::Elevated).await {
                Ok(session) => Ok(session),
                // a token that is not a valid elevated token says nothing new
                Err(AuthError::InvalidToken) => Err(standard_err),
                Err(elevated_err) => Err(elevated_err),
            },
        },
    }
}

/// Best-effort standard-domain identification; any failure yields `None`.
/// Skips the active-account check, so never use it to protect a resource.
pub async fn identify(state: &AppState, token: Option<&str>) -> Option<Session> {
    let token = token?;
    let claims = state.tokens.verify(token, AuthDomain::Standard).ok()?;
    let user = match state.users.find_by_id(claims.sub).await {
        Ok(user) => user?,
        Err(e) => {
            error!(error = ?e, "user lookup failed during soft identification");
            return None;
        }
    };
    Some(Session {
        domain: AuthDomain::Standard,
        user,
        issued_at: claims.iat,
    })
}
