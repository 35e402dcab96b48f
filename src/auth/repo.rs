use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::claims::AuthDomain;
use super::password::PasswordHash;
use super::repo_types::{ResetTicket, Role, User, UserRow};

/// Returned (inside `anyhow`) when the email is already registered.
#[derive(Debug, thiserror::Error)]
#[error("email already registered")]
pub struct EmailTaken;

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: PasswordHash,
}

/// Persistence for user records. Chosen once at startup and shared.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    /// User whose `domain` reset hash equals `token_hash` and has not expired at `now`.
    async fn find_by_reset_hash(
        &self,
        domain: AuthDomain,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>>;
    async fn list(&self) -> anyhow::Result<Vec<User>>;
    async fn create(&self, new: NewUser, now: OffsetDateTime) -> anyhow::Result<User>;
    /// Replaces one credential. Changing the admin credential moves the
    /// invalidation marker to `now`.
    async fn set_credential(
        &self,
        id: Uuid,
        domain: AuthDomain,
        hash: &PasswordHash,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>>;
    async fn set_reset_ticket(
        &self,
        id: Uuid,
        domain: AuthDomain,
        ticket: Option<&ResetTicket>,
    ) -> anyhow::Result<()>;
    /// Sets the credential and clears the ticket in one write, only while the
    /// ticket still matches and is unexpired. `None` means nothing was redeemed.
    async fn redeem_reset(
        &self,
        domain: AuthDomain,
        token_hash: &str,
        hash: &PasswordHash,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>>;
    async fn record_login(
        &self,
        id: Uuid,
        domain: AuthDomain,
        now: OffsetDateTime,
    ) -> anyhow::Result<()>;
    async fn set_role(&self, id: Uuid, role: Role) -> anyhow::Result<Option<User>>;
    async fn set_active(&self, id: Uuid, active: bool) -> anyhow::Result<Option<User>>;
}

const USER_COLUMNS: &str = "id, name, email, role, is_active, password_hash, \
    admin_password_hash, admin_password_changed_at, reset_token_hash, reset_expires_at, \
    admin_reset_token_hash, admin_reset_expires_at, last_login_at, admin_last_login_at, created_at";

struct DomainColumns {
    reset_hash: &'static str,
    reset_expires: &'static str,
    last_login: &'static str,
}

fn columns(domain: AuthDomain) -> DomainColumns {
    match domain {
        AuthDomain::Standard => DomainColumns {
            reset_hash: "reset_token_hash",
            reset_expires: "reset_expires_at",
            last_login: "last_login_at",
        },
        AuthDomain::Elevated => DomainColumns {
            reset_hash: "admin_reset_token_hash",
            reset_expires: "admin_reset_expires_at",
            last_login: "admin_last_login_at",
        },
    }
}

fn credential_assignment(domain: AuthDomain) -> &'static str {
    match domain {
        AuthDomain::Standard => "password_hash = $2",
        AuthDomain::Elevated => "admin_password_hash = $2, admin_password_changed_at = $3",
    }
}

fn into_user(row: Option<UserRow>) -> anyhow::Result<Option<User>> {
    row.map(User::try_from).transpose()
}

/// `users` table in Postgres.
#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        into_user(row)
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        into_user(row)
    }

    async fn find_by_reset_hash(
        &self,
        domain: AuthDomain,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let c = columns(domain);
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {} = $1 AND {} > $2",
            c.reset_hash, c.reset_expires
        ))
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.db)
        .await
        .context("find user by reset hash")?;
        into_user(row)
    }

    async fn list(&self) -> anyhow::Result<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC"
        ))
        .fetch_all(&self.db)
        .await
        .context("list users")?;
        rows.into_iter().map(User::try_from).collect()
    }

    async fn create(&self, new: NewUser, now: OffsetDateTime) -> anyhow::Result<User> {
        let result = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, name, email, role, is_active, password_hash, created_at)
            VALUES ($1, $2, $3, $4, TRUE, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&new.name)
        .bind(&new.email)
        .bind(Role::default().as_str())
        .bind(new.password_hash.as_str())
        .bind(now)
        .fetch_one(&self.db)
        .await;

        match result {
            Ok(row) => User::try_from(row),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(EmailTaken.into()),
            Err(e) => Err(anyhow::Error::new(e).context("create user")),
        }
    }

    async fn set_credential(
        &self,
        id: Uuid,
        domain: AuthDomain,
        hash: &PasswordHash,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let sql = format!(
            "UPDATE users SET {} WHERE id = $1 RETURNING {USER_COLUMNS}",
            credential_assignment(domain)
        );
        let mut query = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(hash.as_str());
        if domain == AuthDomain::Elevated {
            query = query.bind(now);
        }
        let row = query
            .fetch_optional(&self.db)
            .await
            .context("set credential")?;
        into_user(row)
    }

    async fn set_reset_ticket(
        &self,
        id: Uuid,
        domain: AuthDomain,
        ticket: Option<&ResetTicket>,
    ) -> anyhow::Result<()> {
        let c = columns(domain);
        sqlx::query(&format!(
            "UPDATE users SET {} = $2, {} = $3 WHERE id = $1",
            c.reset_hash, c.reset_expires
        ))
        .bind(id)
        .bind(ticket.map(|t| t.token_hash.as_str()))
        .bind(ticket.map(|t| t.expires_at))
        .execute(&self.db)
        .await
        .context("set reset ticket")?;
        Ok(())
    }

    async fn redeem_reset(
        &self,
        domain: AuthDomain,
        token_hash: &str,
        hash: &PasswordHash,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let c = columns(domain);
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
               SET {cred}, {hash_col} = NULL, {exp_col} = NULL
             WHERE {hash_col} = $1 AND {exp_col} > $3
         RETURNING {USER_COLUMNS}
            "#,
            cred = credential_assignment(domain),
            hash_col = c.reset_hash,
            exp_col = c.reset_expires,
        ))
        .bind(token_hash)
        .bind(hash.as_str())
        .bind(now)
        .fetch_optional(&self.db)
        .await
        .context("redeem reset token")?;
        into_user(row)
    }

    async fn record_login(
        &self,
        id: Uuid,
        domain: AuthDomain,
        now: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query(&format!(
            "UPDATE users SET {} = $2 WHERE id = $1",
            columns(domain).last_login
        ))
        .bind(id)
        .bind(now)
        .execute(&self.db)
        .await
        .context("record login")?;
        Ok(())
    }

    async fn set_role(&self, id: Uuid, role: Role) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET role = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(role.as_str())
        .fetch_optional(&self.db)
        .await
        .context("set role")?;
        into_user(row)
    }

    async fn set_active(&self, id: Uuid, active: bool) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET is_active = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(active)
        .fetch_optional(&self.db)
        .await
        .context("set active")?;
        into_user(row)
    }
}
