use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::instrument;

use super::claims::AuthDomain;
use super::dto::{
    AuthResponse, ChangePasswordRequest, ForgotPasswordRequest, LoginRequest, MessageResponse,
    RegisterRequest, ResetPasswordRequest, UserResponse,
};
use super::extractors::{AnySession, MemberSession};
use super::guard::{ADMIN_COOKIE, MEMBER_COOKIE};
use super::jwt::IssuedToken;
use super::repo_types::{PublicUser, User};
use super::services;
use crate::errors::ApiError;
use crate::extract::{AppJson, AppPath};
use crate::state::AppState;

const RESET_SENT: &str = "If that account exists, a reset link has been sent";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(get_me))
        .route("/auth/password", put(change_password))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password/:token", put(reset_password))
}

pub fn admin_auth_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/auth/login", post(admin_login))
        .route("/admin/auth/logout", post(admin_logout))
        .route("/admin/auth/password", put(set_admin_password))
        .route("/admin/auth/forgot-password", post(admin_forgot_password))
        .route("/admin/auth/reset-password/:token", put(admin_reset_password))
}

fn cookie_name(domain: AuthDomain) -> &'static str {
    match domain {
        AuthDomain::Standard => MEMBER_COOKIE,
        AuthDomain::Elevated => ADMIN_COOKIE,
    }
}

fn session_cookie(state: &AppState, domain: AuthDomain, issued: &IssuedToken) -> Cookie<'static> {
    Cookie::build((cookie_name(domain), issued.token.clone()))
        .path("/")
        .http_only(true)
        .secure(state.config.cookie_secure)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(issued.expires_at - issued.issued_at))
        .build()
}

/// Signs a token for `user`, sets its cookie and builds the response body.
fn start_session(
    state: &AppState,
    jar: CookieJar,
    user: &User,
    domain: AuthDomain,
) -> Result<(CookieJar, Json<AuthResponse>), ApiError> {
    let issued = services::issue_token(state, user, domain)?;
    let jar = jar.add(session_cookie(state, domain, &issued));
    Ok((
        jar,
        Json(AuthResponse {
            success: true,
            token: issued.token,
            domain,
            expires_at: issued.expires_at,
            user: PublicUser::from(user),
        }),
    ))
}

fn end_session(jar: CookieJar, domain: AuthDomain) -> (CookieJar, Json<MessageResponse>) {
    let jar = jar.remove(Cookie::build(cookie_name(domain)).path("/"));
    (jar, Json(MessageResponse::ok("Logged out")))
}

#[instrument(skip(state, jar, payload))]
pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    AppJson(payload): AppJson<RegisterRequest>,
) -> Result<(StatusCode, CookieJar, Json<AuthResponse>), ApiError> {
    let user = services::register(&state, payload).await?;
    let (jar, body) = start_session(&state, jar, &user, AuthDomain::Standard)?;
    Ok((StatusCode::CREATED, jar, body))
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    AppJson(payload): AppJson<LoginRequest>,
) -> Result<(CookieJar, Json<AuthResponse>), ApiError> {
    let user = services::login(&state, payload).await?;
    start_session(&state, jar, &user, AuthDomain::Standard)
}

#[instrument(skip(jar))]
pub async fn logout(jar: CookieJar) -> (CookieJar, Json<MessageResponse>) {
    end_session(jar, AuthDomain::Standard)
}

#[instrument(skip(session))]
pub async fn get_me(MemberSession(session): MemberSession) -> Json<UserResponse> {
    Json(UserResponse {
        success: true,
        user: session.public(),
    })
}

#[instrument(skip(state, session, jar, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    MemberSession(session): MemberSession,
    jar: CookieJar,
    AppJson(payload): AppJson<ChangePasswordRequest>,
) -> Result<(CookieJar, Json<AuthResponse>), ApiError> {
    let user = services::change_password(
        &state,
        &session.user,
        &payload.current_password,
        &payload.new_password,
    )
    .await?;
    start_session(&state, jar, &user, AuthDomain::Standard)
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    AppJson(payload): AppJson<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    services::request_reset(&state, &payload.email, AuthDomain::Standard).await?;
    Ok(Json(MessageResponse::ok(RESET_SENT)))
}

#[instrument(skip(state, token, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    AppPath(token): AppPath<String>,
    AppJson(payload): AppJson<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    services::reset_password(&state, AuthDomain::Standard, &token, &payload.password).await?;
    Ok(Json(MessageResponse::ok("Password has been reset")))
}

#[instrument(skip(state, jar, payload))]
pub async fn admin_login(
    State(state): State<AppState>,
    jar: CookieJar,
    AppJson(payload): AppJson<LoginRequest>,
) -> Result<(CookieJar, Json<AuthResponse>), ApiError> {
    let user = services::admin_login(&state, payload).await?;
    start_session(&state, jar, &user, AuthDomain::Elevated)
}

#[instrument(skip(jar))]
pub async fn admin_logout(jar: CookieJar) -> (CookieJar, Json<MessageResponse>) {
    end_session(jar, AuthDomain::Elevated)
}

/// Usable with either token: a freshly promoted admin only has a member
/// session until the admin password exists.
#[instrument(skip(state, session, jar, payload))]
pub async fn set_admin_password(
    State(state): State<AppState>,
    AnySession(session): AnySession,
    jar: CookieJar,
    AppJson(payload): AppJson<ChangePasswordRequest>,
) -> Result<(CookieJar, Json<AuthResponse>), ApiError> {
    let user = services::set_admin_password(
        &state,
        &session,
        &payload.current_password,
        &payload.new_password,
    )
    .await?;
    start_session(&state, jar, &user, AuthDomain::Elevated)
}

#[instrument(skip(state, payload))]
pub async fn admin_forgot_password(
    State(state): State<AppState>,
    AppJson(payload): AppJson<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    services::request_reset(&state, &payload.email, AuthDomain::Elevated).await?;
    Ok(Json(MessageResponse::ok(RESET_SENT)))
}

#[instrument(skip(state, token, payload))]
pub async fn admin_reset_password(
    State(state): State<AppState>,
    AppPath(token): AppPath<String>,
    AppJson(payload): AppJson<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    services::reset_password(&state, AuthDomain::Elevated, &token, &payload.password).await?;
    Ok(Json(MessageResponse::ok("Admin password has been reset")))
}
