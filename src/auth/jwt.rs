use std::time::Duration;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use super::claims::{AuthDomain, Claims};
use crate::clock::unix_micros;
use crate::config::{AppConfig, JwtConfig};

/// Signing and verification keys for one trust domain.
#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub ttl: Duration,
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: Duration::from_secs(cfg.ttl_minutes.unsigned_abs() * 60),
        }
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.set_required_spec_claims(&["exp", "iat", "sub", "aud", "iss"]);
        validation
    }
}

/// A freshly minted bearer token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Mints and verifies bearer tokens for both trust domains. Each domain has
/// its own secret, audience and lifetime.
#[derive(Clone)]
pub struct TokenIssuer {
    standard: JwtKeys,
    elevated: JwtKeys,
}

impl TokenIssuer {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            standard: JwtKeys::from_config(&config.member_jwt),
            elevated: JwtKeys::from_config(&config.admin_jwt),
        }
    }

    pub fn keys(&self, domain: AuthDomain) -> &JwtKeys {
        match domain {
            AuthDomain::Standard => &self.standard,
            AuthDomain::Elevated => &self.elevated,
        }
    }

    pub fn issue(
        &self,
        user_id: Uuid,
        domain: AuthDomain,
        now: OffsetDateTime,
    ) -> anyhow::Result<IssuedToken> {
        let keys = self.keys(domain);
        let iat = now.unix_timestamp();
        let exp = iat + i64::try_from(keys.ttl.as_secs())?;
        let claims = Claims {
            sub: user_id,
            iat,
            iat_us: unix_micros(now),
            exp,
            iss: keys.issuer.clone(),
            aud: keys.audience.clone(),
            domain,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)?;
        debug!(user_id = %user_id, domain = %domain, "jwt signed");
        Ok(IssuedToken {
            token,
            issued_at: iat,
            expires_at: exp,
        })
    }

    /// Checks signature, expiry, issuer and audience against `domain`'s keys.
    pub fn verify(&self, token: &str, domain: AuthDomain) -> anyhow::Result<Claims> {
        let keys = self.keys(domain);
        let data = decode::<Claims>(token, &keys.decoding, &keys.validation())?;
        if data.claims.domain != domain {
            anyhow::bail!("token minted for another domain");
        }
        debug!(user_id = %data.claims.sub, domain = %domain, "jwt verified");
        Ok(data.claims)
    }
}
