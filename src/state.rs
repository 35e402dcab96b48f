use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::{
    jwt::TokenIssuer,
    memory::MemoryUserStore,
    password::PasswordHasher,
    repo::{PgUserStore, UserStore},
    repo_types::Role,
};
use crate::clock::{Clock, SystemClock};
use crate::config::{AppConfig, StoreBackend};
use crate::db;
use crate::notify::{LogNotifier, Notifier};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub tokens: Arc<TokenIssuer>,
    pub hasher: PasswordHasher,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let users: Arc<dyn UserStore> = match (config.store, config.database_url.as_deref()) {
            (StoreBackend::Postgres, Some(url)) => {
                Arc::new(PgUserStore::new(db::connect(url).await?))
            }
            (StoreBackend::Postgres, None) => {
                anyhow::bail!("DATABASE_URL must be set for the postgres store")
            }
            (StoreBackend::Memory, _) => {
                warn!("using in-memory user store; accounts are lost on restart");
                Arc::new(MemoryUserStore::new())
            }
        };

        let state = Self::from_parts(
            config,
            users,
            Arc::new(LogNotifier),
            Arc::new(SystemClock),
        );
        state.bootstrap_admin().await?;
        Ok(state)
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tokens: Arc::new(TokenIssuer::new(&config)),
            hasher: PasswordHasher::new(config.bcrypt_cost),
            config,
            users,
            notifier,
            clock,
        }
    }

    /// Promotes `ADMIN_BOOTSTRAP_EMAIL` to admin. The admin password is
    /// still set through the normal endpoint.
    async fn bootstrap_admin(&self) -> anyhow::Result<()> {
        let Some(email) = self.config.admin_bootstrap_email.as_deref() else {
            return Ok(());
        };
        let email = email.trim().to_lowercase();
        match self.users.find_by_email(&email).await? {
            Some(user) if user.role == Role::Admin => {}
            Some(user) => {
                self.users.set_role(user.id, Role::Admin).await?;
                info!(user_id = %user.id, %email, "bootstrap admin promoted");
            }
            None => warn!(%email, "bootstrap admin email not registered"),
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo::NewUser;

    #[tokio::test]
    async fn bootstrap_promotes_existing_user_without_admin_password() {
        let h = testing::harness();
        let user = h
            .state
            .users
            .create(
                NewUser {
                    name: "Pastor".into(),
                    email: "pastor@example.com".into(),
                    password_hash: h.state.hasher.hash("secret1").await.unwrap(),
                },
                h.state.clock.now(),
            )
            .await
            .unwrap();

        let mut config = (*h.state.config).clone();
        config.admin_bootstrap_email = Some("Pastor@Example.com".into());
        let state = AppState::from_parts(
            Arc::new(config),
            h.state.users.clone(),
            h.notifier.clone(),
            h.clock.clone(),
        );
        state.bootstrap_admin().await.unwrap();

        let promoted = state.users.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(promoted.role, Role::Admin);
        assert!(promoted.admin_password_hash.is_none());
    }
}
