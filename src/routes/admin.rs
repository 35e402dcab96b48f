use axum::{
    extract::State,
    middleware,
    routing::{get, patch},
    Extension, Json, Router,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        extractors::AdminSession,
        dto::{UpdateRoleRequest, UpdateStatusRequest, UserResponse, UsersResponse},
        guard::Session,
        middleware::require_admin,
        repo_types::PublicUser,
    },
    errors::ApiError,
    extract::{AppJson, AppPath},
    state::AppState,
};

/// Admin dashboard. Every route sits behind the admin session layer.
pub fn admin_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/me", get(admin_me))
        .route("/admin/users", get(list_users))
        .route("/admin/users/:id/role", patch(update_role))
        .route("/admin/users/:id/status", patch(update_status))
        .route_layer(middleware::from_fn_with_state(state, require_admin))
}

#[instrument(skip(session))]
pub async fn admin_me(AdminSession(session): AdminSession) -> Json<UserResponse> {
    Json(UserResponse {
        success: true,
        user: session.public(),
    })
}

#[instrument(skip(state))]
pub async fn list_users(State(state): State<AppState>) -> Result<Json<UsersResponse>, ApiError> {
    let users: Vec<PublicUser> = state.users.list().await?.iter().map(PublicUser::from).collect();
    Ok(Json(UsersResponse {
        success: true,
        count: users.len(),
        users,
    }))
}

#[instrument(skip(state, session, payload))]
pub async fn update_role(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    AppPath(id): AppPath<Uuid>,
    AppJson(payload): AppJson<UpdateRoleRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    if id == session.user.id {
        warn!(user_id = %id, "admin tried to change own role");
        return Err(ApiError::field("role", "You cannot change your own role"));
    }
    let user = state
        .users
        .set_role(id, payload.role)
        .await?
        .ok_or(ApiError::NotFound("User not found"))?;
    info!(
        admin_id = %session.user.id,
        user_id = %user.id,
        role = user.role.as_str(),
        "role changed"
    );
    Ok(Json(UserResponse {
        success: true,
        user: PublicUser::from(&user),
    }))
}

#[instrument(skip(state, session, payload))]
pub async fn update_status(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    AppPath(id): AppPath<Uuid>,
    AppJson(payload): AppJson<UpdateStatusRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    if id == session.user.id && !payload.active {
        warn!(user_id = %id, "admin tried to deactivate own account");
        return Err(ApiError::field("active", "You cannot deactivate your own account"));
    }
    let user = state
        .users
        .set_active(id, payload.active)
        .await?
        .ok_or(ApiError::NotFound("User not found"))?;
    info!(
        admin_id = %session.user.id,
        user_id = %user.id,
        active = user.is_active,
        "account status changed"
    );
    Ok(Json(UserResponse {
        success: true,
        user: PublicUser::from(&user),
    }))
}
