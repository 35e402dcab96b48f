use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use super::guard::{authorize, extract_token, AuthError, Requirement};
use crate::state::AppState;

/// Route layer for the admin dashboard: requires a current admin token and
/// attaches the resulting `Session` to the request extensions.
pub async fn require_admin(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = extract_token(req.headers(), Requirement::Elevated);
    let session = authorize(&state, token.as_deref(), Requirement::Elevated).await?;
    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}
