use std::convert::Infallible;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use super::claims::AuthDomain;
use super::guard::{authorize, extract_token, identify, AuthError, Requirement, Session};
use crate::state::AppState;

async fn session_for(
    parts: &Parts,
    state: &AppState,
    requirement: Requirement,
) -> Result<Session, AuthError> {
    // already verified by a route layer
    if let Some(session) = parts.extensions.get::<Session>() {
        let satisfied = match requirement {
            Requirement::Standard => session.domain == AuthDomain::Standard,
            Requirement::Elevated => session.domain == AuthDomain::Elevated,
            Requirement::Either => true,
        };
        if satisfied {
            return Ok(session.clone());
        }
    }
    let token = extract_token(&parts.headers, requirement);
    authorize(state, token.as_deref(), requirement).await
}

/// Caller holding a valid member (standard-domain) token.
pub struct MemberSession(pub Session);

/// Caller holding a valid, current admin (elevated-domain) token.
pub struct AdminSession(pub Session);

/// Caller holding either kind of token; the session says which.
pub struct AnySession(pub Session);

/// Soft identification; never rejects.
pub struct MaybeSession(pub Option<Session>);

#[async_trait]
impl FromRequestParts<AppState> for MemberSession {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        session_for(parts, state, Requirement::Standard).await.map(Self)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AdminSession {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        session_for(parts, state, Requirement::Elevated).await.map(Self)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AnySession {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        session_for(parts, state, Requirement::Either).await.map(Self)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for MaybeSession {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers, Requirement::Standard);
        Ok(Self(identify(state, token.as_deref()).await))
    }
}
