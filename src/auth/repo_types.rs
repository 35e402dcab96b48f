use anyhow::bail;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use super::claims::AuthDomain;
use super::password::PasswordHash;
use crate::clock::unix_micros;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Guest,
    Member,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::Member => "member",
            Role::Admin => "admin",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "guest" => Ok(Role::Guest),
            "member" => Ok(Role::Member),
            "admin" => Ok(Role::Admin),
            other => bail!("unknown role {other:?}"),
        }
    }
}

/// Hashed one-time reset secret and its deadline.
#[derive(Clone, PartialEq, Eq)]
pub struct ResetTicket {
    pub token_hash: String,
    pub expires_at: OffsetDateTime,
}

impl std::fmt::Debug for ResetTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResetTicket")
            .field("token_hash", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// User record. Credential and reset fields are never serialized.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    #[serde(skip_serializing)]
    pub password_hash: PasswordHash,
    #[serde(skip_serializing)]
    pub admin_password_hash: Option<PasswordHash>,
    #[serde(skip_serializing)]
    pub admin_password_changed_at: Option<OffsetDateTime>,
    #[serde(skip_serializing)]
    pub password_reset: Option<ResetTicket>,
    #[serde(skip_serializing)]
    pub admin_password_reset: Option<ResetTicket>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub admin_last_login_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl User {
    /// Role alone does not grant admin access; the admin password must exist too.
    pub fn has_admin_access(&self) -> bool {
        self.role == Role::Admin && self.admin_password_hash.is_some()
    }

    pub fn credential(&self, domain: AuthDomain) -> Option<&PasswordHash> {
        match domain {
            AuthDomain::Standard => Some(&self.password_hash),
            AuthDomain::Elevated => self.admin_password_hash.as_ref(),
        }
    }

    pub fn reset_ticket(&self, domain: AuthDomain) -> Option<&ResetTicket> {
        match domain {
            AuthDomain::Standard => self.password_reset.as_ref(),
            AuthDomain::Elevated => self.admin_password_reset.as_ref(),
        }
    }

    /// True when an elevated token issued at `iat_us` (unix microseconds)
    /// predates the last admin password change.
    pub fn admin_token_is_stale(&self, iat_us: i64) -> bool {
        self.admin_password_changed_at
            .is_some_and(|changed| iat_us < unix_micros(changed))
    }
}

/// Public part of the user returned to the client.
#[derive(Debug, Clone, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    pub has_admin_password: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            name: u.name.clone(),
            email: u.email.clone(),
            role: u.role,
            is_active: u.is_active,
            has_admin_password: u.admin_password_hash.is_some(),
            last_login_at: u.last_login_at,
            created_at: u.created_at,
        }
    }
}

/// Row shape of the `users` table.
#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: String,
    pub is_active: bool,
    pub password_hash: String,
    pub admin_password_hash: Option<String>,
    pub admin_password_changed_at: Option<OffsetDateTime>,
    pub reset_token_hash: Option<String>,
    pub reset_expires_at: Option<OffsetDateTime>,
    pub admin_reset_token_hash: Option<String>,
    pub admin_reset_expires_at: Option<OffsetDateTime>,
    pub last_login_at: Option<OffsetDateTime>,
    pub admin_last_login_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

fn ticket(hash: Option<String>, expires: Option<OffsetDateTime>) -> Option<ResetTicket> {
    match (hash, expires) {
        (Some(token_hash), Some(expires_at)) => Some(ResetTicket {
            token_hash,
            expires_at,
        }),
        _ => None,
    }
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            name: r.name,
            email: r.email,
            role: r.role.parse()?,
            is_active: r.is_active,
            password_hash: PasswordHash::from_stored(r.password_hash),
            admin_password_hash: r.admin_password_hash.map(PasswordHash::from_stored),
            admin_password_changed_at: r.admin_password_changed_at,
            password_reset: ticket(r.reset_token_hash, r.reset_expires_at),
            admin_password_reset: ticket(r.admin_reset_token_hash, r.admin_reset_expires_at),
            last_login_at: r.last_login_at,
            admin_last_login_at: r.admin_last_login_at,
            created_at: r.created_at,
        })
    }
}

#[cfg(test)]
pub(crate) fn sample_user(role: Role) -> User {
    let now = OffsetDateTime::now_utc();
    User {
        id: Uuid::new_v4(),
        name: "Test User".into(),
        email: "test@example.com".into(),
        role,
        is_active: true,
        password_hash: PasswordHash::from_stored(
            "$2b$04$standardhashstandardhashstandardha".into(),
        ),
        admin_password_hash: Some(PasswordHash::from_stored(
            "$2b$04$adminhashadminhashadminhashadminha".into(),
        )),
        admin_password_changed_at: Some(now),
        password_reset: Some(ResetTicket {
            token_hash: "resethashvalue".into(),
            expires_at: now,
        }),
        admin_password_reset: Some(ResetTicket {
            token_hash: "adminresethashvalue".into(),
            expires_at: now,
        }),
        last_login_at: Some(now),
        admin_last_login_at: None,
        created_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_user_never_contains_secrets() {
        for role in [Role::Guest, Role::Member, Role::Admin] {
            let user = sample_user(role);
            for json in [
                serde_json::to_string(&user).unwrap(),
                serde_json::to_string(&PublicUser::from(&user)).unwrap(),
            ] {
                assert!(json.contains("test@example.com"));
                assert!(!json.contains("standardhash"));
                assert!(!json.contains("adminhash"));
                assert!(!json.contains("resethashvalue"));
                assert!(!json.contains("password_hash"));
                assert!(!json.contains("reset"));
            }
        }
    }

    #[test]
    fn debug_output_hides_hashes() {
        let user = sample_user(Role::Admin);
        let printed = format!("{user:?}");
        assert!(printed.contains("test@example.com"));
        assert!(!printed.contains("resethashvalue"));
        assert!(!printed.contains("adminresethashvalue"));
        assert!(!printed.contains("standardhash"));
    }

    #[test]
    fn role_alone_is_not_admin_access() {
        let mut user = sample_user(Role::Admin);
        assert!(user.has_admin_access());
        user.admin_password_hash = None;
        assert!(!user.has_admin_access());
        let member = sample_user(Role::Member);
        assert!(!member.has_admin_access());
    }

    #[test]
    fn staleness_compares_against_change_marker() {
        let mut user = sample_user(Role::Admin);
        let changed = unix_micros(user.admin_password_changed_at.unwrap());
        assert!(user.admin_token_is_stale(changed - 1));
        assert!(user.admin_token_is_stale(changed - 500_000));
        assert!(!user.admin_token_is_stale(changed));
        user.admin_password_changed_at = None;
        assert!(!user.admin_token_is_stale(0));
    }

    #[test]
    fn role_parses_and_defaults_to_guest() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert!("owner".parse::<Role>().is_err());
        assert_eq!(Role::default(), Role::Guest);
    }
}
