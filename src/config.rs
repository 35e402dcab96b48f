use anyhow::{bail, Context};
use serde::Deserialize;

/// Minimum accepted length of a signing secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Signing parameters for one trust domain.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub member_jwt: JwtConfig,
    pub admin_jwt: JwtConfig,
    pub bcrypt_cost: u32,
    pub cookie_secure: bool,
    pub reset_url_base: String,
    pub admin_bootstrap_email: Option<String>,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{key}: {e}")),
        None => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let store = match env_opt("STORE_BACKEND").as_deref() {
            None | Some("postgres") => StoreBackend::Postgres,
            Some("memory") => StoreBackend::Memory,
            Some(other) => bail!("STORE_BACKEND: unknown backend {other:?}"),
        };
        let issuer = env_opt("JWT_ISSUER").unwrap_or_else(|| "flock".into());

        let member_jwt = JwtConfig {
            secret: env_opt("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: issuer.clone(),
            audience: "flock-members".into(),
            ttl_minutes: env_parse::<i64>("JWT_EXPIRES_IN_DAYS", 7)? * 24 * 60,
        };
        let admin_jwt = JwtConfig {
            secret: env_opt("ADMIN_JWT_SECRET").context("ADMIN_JWT_SECRET must be set")?,
            issuer,
            audience: "flock-admin".into(),
            ttl_minutes: env_parse::<i64>("ADMIN_JWT_EXPIRES_IN_HOURS", 8)? * 60,
        };

        let config = Self {
            store,
            database_url: env_opt("DATABASE_URL"),
            member_jwt,
            admin_jwt,
            bcrypt_cost: env_parse("BCRYPT_COST", bcrypt::DEFAULT_COST)?,
            cookie_secure: env_parse("COOKIE_SECURE", true)?,
            reset_url_base: env_opt("RESET_URL_BASE")
                .unwrap_or_else(|| "http://localhost:3000".into()),
            admin_bootstrap_email: env_opt("ADMIN_BOOTSTRAP_EMAIL"),
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the service must not start with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let domains = [
            ("JWT_SECRET", &self.member_jwt),
            ("ADMIN_JWT_SECRET", &self.admin_jwt),
        ];
        for (name, jwt) in domains {
            if jwt.secret.len() < MIN_SECRET_LEN {
                bail!("{name} must be at least {MIN_SECRET_LEN} bytes");
            }
            if jwt.ttl_minutes <= 0 {
                bail!("{name}: token lifetime must be positive");
            }
        }
        if self.member_jwt.secret == self.admin_jwt.secret {
            bail!("JWT_SECRET and ADMIN_JWT_SECRET must differ");
        }
        if !(4..=31).contains(&self.bcrypt_cost) {
            bail!("BCRYPT_COST must be between 4 and 31");
        }
        if self.store == StoreBackend::Postgres && self.database_url.is_none() {
            bail!("DATABASE_URL must be set for the postgres store");
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        store: StoreBackend::Memory,
        database_url: None,
        member_jwt: JwtConfig {
            secret: "member-secret-member-secret-member-secret".into(),
            issuer: "test-issuer".into(),
            audience: "flock-members".into(),
            ttl_minutes: 7 * 24 * 60,
        },
        admin_jwt: JwtConfig {
            secret: "admin-secret-admin-secret-admin-secret-xx".into(),
            issuer: "test-issuer".into(),
            audience: "flock-admin".into(),
            ttl_minutes: 8 * 60,
        },
        bcrypt_cost: 4,
        cookie_secure: false,
        reset_url_base: "http://localhost:3000".into(),
        admin_bootstrap_email: None,
    }
}
