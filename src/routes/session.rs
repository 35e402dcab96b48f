use axum::Json;
use tracing::instrument;

use crate::auth::{dto::SessionResponse, extractors::MaybeSession};

/// Optional personalization. Reports admin status only when the account
/// has both the admin role and an admin password.
#[instrument(skip(session))]
pub async fn current_session(MaybeSession(session): MaybeSession) -> Json<SessionResponse> {
    Json(match session {
        Some(session) => SessionResponse {
            authenticated: true,
            is_admin: session.user.has_admin_access(),
            user: Some(session.public()),
        },
        None => SessionResponse {
            authenticated: false,
            is_admin: false,
            user: None,
        },
    })
}
