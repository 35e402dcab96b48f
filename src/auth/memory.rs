use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::claims::AuthDomain;
use super::password::PasswordHash;
use super::repo::{EmailTaken, NewUser, UserStore};
use super::repo_types::{ResetTicket, Role, User};

/// In-process store for development and tests. Every write takes the lock
/// for the whole read-modify-write, so each call is atomic per user.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update<F>(&self, id: Uuid, f: F) -> Option<User>
    where
        F: FnOnce(&mut User) + Send,
    {
        let mut users = self.users.write().await;
        let user = users.get_mut(&id)?;
        f(user);
        Some(user.clone())
    }
}

fn ticket_slot(user: &mut User, domain: AuthDomain) -> &mut Option<ResetTicket> {
    match domain {
        AuthDomain::Standard => &mut user.password_reset,
        AuthDomain::Elevated => &mut user.admin_password_reset,
    }
}

fn apply_credential(user: &mut User, domain: AuthDomain, hash: &PasswordHash, now: OffsetDateTime) {
    match domain {
        AuthDomain::Standard => user.password_hash = hash.clone(),
        AuthDomain::Elevated => {
            user.admin_password_hash = Some(hash.clone());
            user.admin_password_changed_at = Some(now);
        }
    }
}

fn ticket_matches(user: &User, domain: AuthDomain, token_hash: &str, now: OffsetDateTime) -> bool {
    user.reset_ticket(domain)
        .is_some_and(|t| t.token_hash == token_hash && t.expires_at > now)
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_by_reset_hash(
        &self,
        domain: AuthDomain,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| ticket_matches(u, domain, token_hash, now))
            .cloned())
    }

    async fn list(&self) -> anyhow::Result<Vec<User>> {
        let mut users: Vec<User> = self.users.read().await.values().cloned().collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(users)
    }

    async fn create(&self, new: NewUser, now: OffsetDateTime) -> anyhow::Result<User> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == new.email) {
            return Err(EmailTaken.into());
        }
        let user = User {
            id: Uuid::new_v4(),
            name: new.name,
            email: new.email,
            role: Role::default(),
            is_active: true,
            password_hash: new.password_hash,
            admin_password_hash: None,
            admin_password_changed_at: None,
            password_reset: None,
            admin_password_reset: None,
            last_login_at: None,
            admin_last_login_at: None,
            created_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn set_credential(
        &self,
        id: Uuid,
        domain: AuthDomain,
        hash: &PasswordHash,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        Ok(self
            .update(id, |u| apply_credential(u, domain, hash, now))
            .await)
    }

    async fn set_reset_ticket(
        &self,
        id: Uuid,
        domain: AuthDomain,
        ticket: Option<&ResetTicket>,
    ) -> anyhow::Result<()> {
        let ticket = ticket.cloned();
        self.update(id, |u| *ticket_slot(u, domain) = ticket).await;
        Ok(())
    }

    async fn redeem_reset(
        &self,
        domain: AuthDomain,
        token_hash: &str,
        hash: &PasswordHash,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let mut users = self.users.write().await;
        let Some(user) = users
            .values_mut()
            .find(|u| ticket_matches(u, domain, token_hash, now))
        else {
            return Ok(None);
        };
        apply_credential(user, domain, hash, now);
        *ticket_slot(user, domain) = None;
        Ok(Some(user.clone()))
    }

    async fn record_login(
        &self,
        id: Uuid,
        domain: AuthDomain,
        now: OffsetDateTime,
    ) -> anyhow::Result<()> {
        self.update(id, |u| match domain {
            AuthDomain::Standard => u.last_login_at = Some(now),
            AuthDomain::Elevated => u.admin_last_login_at = Some(now),
        })
        .await;
        Ok(())
    }

    async fn set_role(&self, id: Uuid, role: Role) -> anyhow::Result<Option<User>> {
        Ok(self.update(id, |u| u.role = role).await)
    }

    async fn set_active(&self, id: Uuid, active: bool) -> anyhow::Result<Option<User>> {
        Ok(self.update(id, |u| u.is_active = active).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::PasswordHasher;

    async fn seeded() -> (MemoryUserStore, User) {
        let store = MemoryUserStore::new();
        let hash = PasswordHasher::new(4).hash("secret1").await.unwrap();
        let user = store
            .create(
                NewUser {
                    name: "Ruth".into(),
                    email: "ruth@example.com".into(),
                    password_hash: hash,
                },
                OffsetDateTime::now_utc(),
            )
            .await
            .unwrap();
        (store, user)
    }

    #[tokio::test]
    async fn new_users_are_active_guests_without_admin_password() {
        let (_, user) = seeded().await;
        assert_eq!(user.role, Role::Guest);
        assert!(user.is_active);
        assert!(user.admin_password_hash.is_none());
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let (store, user) = seeded().await;
        let err = store
            .create(
                NewUser {
                    name: "Other".into(),
                    email: user.email.clone(),
                    password_hash: user.password_hash.clone(),
                },
                OffsetDateTime::now_utc(),
            )
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<EmailTaken>().is_some());
    }

    #[tokio::test]
    async fn setting_one_credential_leaves_the_other() {
        let (store, user) = seeded().await;
        let hasher = PasswordHasher::new(4);
        let admin = hasher.hash("Adm1n$Pass").await.unwrap();
        let now = OffsetDateTime::now_utc();

        let after = store
            .set_credential(user.id, AuthDomain::Elevated, &admin, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.password_hash, user.password_hash);
        assert_eq!(after.admin_password_changed_at, Some(now));

        let standard = hasher.hash("another1").await.unwrap();
        let after2 = store
            .set_credential(user.id, AuthDomain::Standard, &standard, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after2.admin_password_hash, Some(admin));
        assert_eq!(after2.password_hash, standard);
    }

    #[tokio::test]
    async fn redeem_clears_ticket_and_is_single_use() {
        let (store, user) = seeded().await;
        let now = OffsetDateTime::now_utc();
        let ticket = ResetTicket {
            token_hash: "abc".into(),
            expires_at: now + time::Duration::minutes(10),
        };
        store
            .set_reset_ticket(user.id, AuthDomain::Standard, Some(&ticket))
            .await
            .unwrap();
        let hash = PasswordHasher::new(4).hash("fresh-pass").await.unwrap();

        let redeemed = store
            .redeem_reset(AuthDomain::Standard, "abc", &hash, now)
            .await
            .unwrap()
            .expect("first redemption succeeds");
        assert!(redeemed.password_reset.is_none());
        assert!(store
            .redeem_reset(AuthDomain::Standard, "abc", &hash, now)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn reset_tickets_are_per_domain() {
        let (store, user) = seeded().await;
        let now = OffsetDateTime::now_utc();
        let ticket = ResetTicket {
            token_hash: "abc".into(),
            expires_at: now + time::Duration::minutes(10),
        };
        store
            .set_reset_ticket(user.id, AuthDomain::Standard, Some(&ticket))
            .await
            .unwrap();
        assert!(store
            .find_by_reset_hash(AuthDomain::Elevated, "abc", now)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_by_reset_hash(AuthDomain::Standard, "abc", now)
            .await
            .unwrap()
            .is_some());
    }
}
