use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, warn};

use super::claims::AuthDomain;
use super::dto::{LoginRequest, RegisterRequest};
use super::guard::Session;
use super::jwt::IssuedToken;
use super::password::{
    validate_password, verify_password, MIN_ADMIN_PASSWORD_LEN, MIN_PASSWORD_LEN,
};
use super::repo::{EmailTaken, NewUser};
use super::repo_types::{Role, User};
use super::reset;
use crate::errors::{ApiError, FieldError};
use crate::notify::reset_url;
use crate::state::AppState;

const INVALID_CREDENTIALS: &str = "Invalid credentials";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn checked_email(raw: &str) -> Result<String, ApiError> {
    let email = normalize_email(raw);
    if !is_valid_email(&email) {
        warn!(%email, "invalid email");
        return Err(ApiError::field("email", "Invalid email"));
    }
    Ok(email)
}

pub fn min_password_len(domain: AuthDomain) -> usize {
    match domain {
        AuthDomain::Standard => MIN_PASSWORD_LEN,
        AuthDomain::Elevated => MIN_ADMIN_PASSWORD_LEN,
    }
}

pub fn issue_token(
    state: &AppState,
    user: &User,
    domain: AuthDomain,
) -> Result<IssuedToken, ApiError> {
    let issued = state.tokens.issue(user.id, domain, state.clock.now()).map_err(|e| {
        error!(error = %e, user_id = %user.id, domain = %domain, "jwt sign failed");
        ApiError::Internal(e)
    })?;
    Ok(issued)
}

/// Creates a guest account holding only the ordinary password.
pub async fn register(state: &AppState, req: RegisterRequest) -> Result<User, ApiError> {
    let mut errors = Vec::new();
    let name = req.name.trim().to_owned();
    if name.is_empty() {
        errors.push(FieldError::new("name", "Name is required"));
    }
    let email = normalize_email(&req.email);
    if !is_valid_email(&email) {
        errors.push(FieldError::new("email", "Invalid email"));
    }
    if let Err(e) = validate_password("password", &req.password, MIN_PASSWORD_LEN) {
        errors.push(e);
    }
    if !errors.is_empty() {
        warn!(%email, "registration rejected");
        return Err(ApiError::Validation(errors));
    }

    if state.users.find_by_email(&email).await?.is_some() {
        warn!(%email, "email already registered");
        return Err(ApiError::Conflict("Email already registered"));
    }

    let password_hash = state.hasher.hash(&req.password).await?;
    let user = state
        .users
        .create(
            NewUser {
                name,
                email,
                password_hash,
            },
            state.clock.now(),
        )
        .await
        .map_err(|e| {
            if e.downcast_ref::<EmailTaken>().is_some() {
                ApiError::Conflict("Email already registered")
            } else {
                ApiError::Internal(e)
            }
        })?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok(user)
}

/// Member login against the ordinary password.
pub async fn login(state: &AppState, req: LoginRequest) -> Result<User, ApiError> {
    let email = checked_email(&req.email)?;

    let Some(user) = state.users.find_by_email(&email).await? else {
        warn!(%email, "login unknown email");
        return Err(ApiError::Unauthorized(INVALID_CREDENTIALS));
    };
    if !verify_password(&req.password, user.credential(AuthDomain::Standard)).await? {
        warn!(%email, user_id = %user.id, "login invalid password");
        return Err(ApiError::Unauthorized(INVALID_CREDENTIALS));
    }
    if !user.is_active {
        warn!(user_id = %user.id, "login on inactive account");
        return Err(ApiError::Unauthorized(INVALID_CREDENTIALS));
    }

    state
        .users
        .record_login(user.id, AuthDomain::Standard, state.clock.now())
        .await?;
    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok(user)
}

/// Admin login against the separately set admin password.
pub async fn admin_login(state: &AppState, req: LoginRequest) -> Result<User, ApiError> {
    let email = checked_email(&req.email)?;

    let Some(user) = state.users.find_by_email(&email).await? else {
        warn!(%email, "admin login unknown email");
        return Err(ApiError::Unauthorized(INVALID_CREDENTIALS));
    };
    if !user.is_active {
        warn!(user_id = %user.id, "admin login on inactive account");
        return Err(ApiError::Unauthorized(INVALID_CREDENTIALS));
    }
    if user.role != Role::Admin {
        warn!(user_id = %user.id, role = user.role.as_str(), "admin login by non-admin");
        return Err(ApiError::Forbidden("Admin access required"));
    }
    if user.admin_password_hash.is_none() {
        warn!(user_id = %user.id, "admin login before admin password was set");
        return Err(ApiError::Forbidden("Admin password not set"));
    }
    if !verify_password(&req.password, user.credential(AuthDomain::Elevated)).await? {
        warn!(user_id = %user.id, "admin login invalid password");
        return Err(ApiError::Unauthorized(INVALID_CREDENTIALS));
    }

    state
        .users
        .record_login(user.id, AuthDomain::Elevated, state.clock.now())
        .await?;
    info!(user_id = %user.id, email = %user.email, "admin logged in");
    Ok(user)
}

/// Replaces the ordinary password after checking the current one.
pub async fn change_password(
    state: &AppState,
    user: &User,
    current: &str,
    new: &str,
) -> Result<User, ApiError> {
    validate_password("new_password", new, MIN_PASSWORD_LEN)
        .map_err(|e| ApiError::Validation(vec![e]))?;
    if !verify_password(current, user.credential(AuthDomain::Standard)).await? {
        warn!(user_id = %user.id, "password change with wrong current password");
        return Err(ApiError::Unauthorized("Current password is incorrect"));
    }

    let hash = state.hasher.hash(new).await?;
    let updated = state
        .users
        .set_credential(user.id, AuthDomain::Standard, &hash, state.clock.now())
        .await?
        .ok_or(ApiError::NotFound("User not found"))?;
    info!(user_id = %user.id, "password changed");
    Ok(updated)
}

/// Sets or changes the admin password.
///
/// The first time, the caller proves identity with the ordinary password;
/// afterwards only the current admin password is accepted. Every change
/// moves the invalidation marker, so older admin tokens stop working.
pub async fn set_admin_password(
    state: &AppState,
    session: &Session,
    current: &str,
    new: &str,
) -> Result<User, ApiError> {
    let user = &session.user;
    if user.role != Role::Admin {
        warn!(user_id = %user.id, role = user.role.as_str(), "admin password change by non-admin");
        return Err(ApiError::Forbidden("Admin access required"));
    }
    validate_password("new_password", new, MIN_ADMIN_PASSWORD_LEN)
        .map_err(|e| ApiError::Validation(vec![e]))?;

    let proof_domain = if user.admin_password_hash.is_some() {
        AuthDomain::Elevated
    } else {
        AuthDomain::Standard
    };
    if !verify_password(current, user.credential(proof_domain)).await? {
        warn!(
            user_id = %user.id,
            proof = %proof_domain,
            "admin password change with wrong current password"
        );
        return Err(ApiError::Unauthorized("Current password is incorrect"));
    }

    let hash = state.hasher.hash(new).await?;
    let updated = state
        .users
        .set_credential(user.id, AuthDomain::Elevated, &hash, state.clock.now())
        .await?
        .ok_or(ApiError::NotFound("User not found"))?;
    info!(
        user_id = %user.id,
        first_time = proof_domain == AuthDomain::Standard,
        "admin password set"
    );
    Ok(updated)
}

/// Issues a reset token for `email` when it belongs to an eligible account
/// and hands the link to the notifier. Silent for unknown emails.
pub async fn request_reset(
    state: &AppState,
    email: &str,
    domain: AuthDomain,
) -> Result<(), ApiError> {
    let email = checked_email(email)?;
    let Some(user) = state.users.find_by_email(&email).await? else {
        info!(%email, domain = %domain, "reset requested for unknown email");
        return Ok(());
    };
    let eligible = match domain {
        AuthDomain::Standard => user.is_active,
        AuthDomain::Elevated => user.role == Role::Admin,
    };
    if !eligible {
        info!(user_id = %user.id, domain = %domain, "reset requested for ineligible account");
        return Ok(());
    }

    let raw = reset::issue(state.users.as_ref(), &user, domain, state.clock.now()).await?;
    let url = reset_url(&state.config.reset_url_base, domain, &raw);
    if let Err(e) = state
        .notifier
        .send_password_reset(&user.email, &user.name, domain, &url)
        .await
    {
        // an undeliverable token must not stay redeemable
        state.users.set_reset_ticket(user.id, domain, None).await?;
        return Err(ApiError::Internal(e.context("send reset notification")));
    }
    Ok(())
}

pub async fn reset_password(
    state: &AppState,
    domain: AuthDomain,
    raw_token: &str,
    password: &str,
) -> Result<User, ApiError> {
    validate_password("password", password, min_password_len(domain))
        .map_err(|e| ApiError::Validation(vec![e]))?;
    reset::redeem(
        state.users.as_ref(),
        &state.hasher,
        domain,
        raw_token,
        password,
        state.clock.now(),
    )
    .await
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::auth::guard::{authorize, Requirement};
    use crate::clock::Clock;
    use crate::state::testing::{harness, TestHarness};

    async fn registered(h: &TestHarness, email: &str) -> User {
        register(
            &h.state,
            RegisterRequest {
                name: "Ruth".into(),
                email: email.into(),
                password: "secret1".into(),
            },
        )
        .await
        .expect("register")
    }

    fn login_req(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.into(),
            password: password.into(),
        }
    }

    async fn promote(h: &TestHarness, user: &User) -> User {
        h.state.users.set_role(user.id, Role::Admin).await.unwrap().unwrap()
    }

    fn standard_session(h: &TestHarness, user: User) -> Session {
        Session {
            domain: AuthDomain::Standard,
            issued_at: h.clock.now().unix_timestamp(),
            user,
        }
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("ruth@example.com"));
        assert!(!is_valid_email("ruth@example"));
        assert!(!is_valid_email("ruth example.com"));
        assert_eq!(normalize_email("  Ruth@Example.COM "), "ruth@example.com");
    }

    #[tokio::test]
    async fn register_then_login() {
        let h = harness();
        let user = registered(&h, "Ruth@Example.com").await;
        assert_eq!(user.email, "ruth@example.com");
        assert_eq!(user.role, Role::Guest);
        assert!(user.admin_password_hash.is_none());

        let logged = login(&h.state, login_req("ruth@example.com", "secret1")).await.unwrap();
        assert_eq!(logged.id, user.id);
        let stored = h.state.users.find_by_id(user.id).await.unwrap().unwrap();
        assert!(stored.last_login_at.is_some());

        let err = login(&h.state, login_req("ruth@example.com", "wrong")).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn register_reports_every_bad_field() {
        let h = harness();
        let err = register(
            &h.state,
            RegisterRequest {
                name: " ".into(),
                email: "nope".into(),
                password: "123".into(),
            },
        )
        .await
        .unwrap_err();
        let ApiError::Validation(fields) = err else {
            panic!("expected validation error");
        };
        let names: Vec<_> = fields.iter().map(|f| f.field.as_ref()).collect();
        assert_eq!(names, ["name", "email", "password"]);
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let h = harness();
        registered(&h, "ruth@example.com").await;
        let err = register(
            &h.state,
            RegisterRequest {
                name: "Other".into(),
                email: "RUTH@example.com".into(),
                password: "secret2".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn inactive_account_cannot_log_in() {
        let h = harness();
        let user = registered(&h, "ruth@example.com").await;
        h.state.users.set_active(user.id, false).await.unwrap();
        let err = login(&h.state, login_req("ruth@example.com", "secret1")).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn admin_role_without_admin_password_is_forbidden() {
        let h = harness();
        let user = registered(&h, "ruth@example.com").await;
        promote(&h, &user).await;
        let err = admin_login(&h.state, login_req("ruth@example.com", "secret1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden("Admin password not set")));
    }

    #[tokio::test]
    async fn non_admin_cannot_use_admin_login() {
        let h = harness();
        registered(&h, "ruth@example.com").await;
        let err = admin_login(&h.state, login_req("ruth@example.com", "secret1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden("Admin access required")));
    }

    #[tokio::test]
    async fn admin_password_is_independent_of_member_password() {
        let h = harness();
        let user = registered(&h, "ruth@example.com").await;
        let admin = promote(&h, &user).await;
        let session = standard_session(&h, admin);

        let updated = set_admin_password(&h.state, &session, "secret1", "Adm1n$Pass")
            .await
            .unwrap();
        assert_eq!(updated.password_hash, user.password_hash);

        // the member password does not open the admin domain
        let err = admin_login(&h.state, login_req("ruth@example.com", "secret1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
        admin_login(&h.state, login_req("ruth@example.com", "Adm1n$Pass"))
            .await
            .expect("admin login with admin password");
        // and the admin password does not open the member domain
        assert!(login(&h.state, login_req("ruth@example.com", "Adm1n$Pass")).await.is_err());
    }

    #[tokio::test]
    async fn changing_admin_password_requires_current_admin_password() {
        let h = harness();
        let user = registered(&h, "ruth@example.com").await;
        let admin = promote(&h, &user).await;
        let first = standard_session(&h, admin);
        let with_admin_pw = set_admin_password(&h.state, &first, "secret1", "Adm1n$Pass")
            .await
            .unwrap();

        let session = standard_session(&h, with_admin_pw);
        let err = set_admin_password(&h.state, &session, "secret1", "NewAdm1n$Pass")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
        set_admin_password(&h.state, &session, "Adm1n$Pass", "NewAdm1n$Pass")
            .await
            .expect("change with current admin password");
    }

    #[tokio::test]
    async fn short_admin_password_is_a_validation_error() {
        let h = harness();
        let user = registered(&h, "ruth@example.com").await;
        let admin = promote(&h, &user).await;
        let err = set_admin_password(&h.state, &standard_session(&h, admin), "secret1", "short")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn members_cannot_set_an_admin_password() {
        let h = harness();
        let user = registered(&h, "ruth@example.com").await;
        let err = set_admin_password(&h.state, &standard_session(&h, user), "secret1", "Adm1n$Pass")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[tokio::test]
    async fn admin_scenario_old_token_goes_stale() {
        let h = harness();
        let user = registered(&h, "ruth@example.com").await;
        let admin = promote(&h, &user).await;
        set_admin_password(&h.state, &standard_session(&h, admin), "secret1", "Adm1n$Pass")
            .await
            .unwrap();

        h.clock.advance(Duration::seconds(2));
        let admin = admin_login(&h.state, login_req("ruth@example.com", "Adm1n$Pass"))
            .await
            .unwrap();
        let old = issue_token(&h.state, &admin, AuthDomain::Elevated).unwrap();
        let session = authorize(&h.state, Some(&old.token), Requirement::Elevated)
            .await
            .unwrap();

        h.clock.advance(Duration::seconds(2));
        set_admin_password(&h.state, &session, "Adm1n$Pass", "NewAdm1n$Pass")
            .await
            .unwrap();
        assert!(authorize(&h.state, Some(&old.token), Requirement::Elevated)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn forgot_password_notifies_and_reset_works_once() {
        let h = harness();
        registered(&h, "ruth@example.com").await;
        request_reset(&h.state, "ruth@example.com", AuthDomain::Standard)
            .await
            .unwrap();
        let raw = h.notifier.last_token().expect("reset link sent");

        reset_password(&h.state, AuthDomain::Standard, &raw, "renewed1").await.unwrap();
        login(&h.state, login_req("ruth@example.com", "renewed1")).await.unwrap();
        let again = reset_password(&h.state, AuthDomain::Standard, &raw, "renewed2").await;
        assert!(matches!(again, Err(ApiError::InvalidResetToken)));
    }

    #[tokio::test]
    async fn reset_after_ten_minutes_fails() {
        let h = harness();
        registered(&h, "ruth@example.com").await;
        request_reset(&h.state, "ruth@example.com", AuthDomain::Standard)
            .await
            .unwrap();
        let raw = h.notifier.last_token().unwrap();
        h.clock.advance(Duration::minutes(10) + Duration::seconds(1));
        let res = reset_password(&h.state, AuthDomain::Standard, &raw, "renewed1").await;
        assert!(matches!(res, Err(ApiError::InvalidResetToken)));
    }

    #[tokio::test]
    async fn unknown_email_is_silent() {
        let h = harness();
        request_reset(&h.state, "ghost@example.com", AuthDomain::Standard)
            .await
            .unwrap();
        assert_eq!(h.notifier.count(), 0);
    }

    #[tokio::test]
    async fn elevated_reset_only_for_admins() {
        let h = harness();
        let user = registered(&h, "ruth@example.com").await;
        request_reset(&h.state, "ruth@example.com", AuthDomain::Elevated)
            .await
            .unwrap();
        assert_eq!(h.notifier.count(), 0);

        promote(&h, &user).await;
        request_reset(&h.state, "ruth@example.com", AuthDomain::Elevated)
            .await
            .unwrap();
        let raw = h.notifier.last_token().unwrap();
        let updated = reset_password(&h.state, AuthDomain::Elevated, &raw, "Adm1n$Pass")
            .await
            .unwrap();
        assert!(updated.admin_password_hash.is_some());
        assert!(updated.admin_password_changed_at.is_some());
        admin_login(&h.state, login_req("ruth@example.com", "Adm1n$Pass"))
            .await
            .unwrap();
    }
}
