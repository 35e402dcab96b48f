use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Trust domain a token or credential belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AuthDomain {
    /// Member-facing session, backed by the ordinary password.
    Standard,
    /// Admin session, backed by the separately set admin password.
    Elevated,
}

impl AuthDomain {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthDomain::Standard => "standard",
            AuthDomain::Elevated => "elevated",
        }
    }
}

impl std::fmt::Display for AuthDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JWT payload used for authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,           // user ID
    pub iat: i64,            // issued at (unix timestamp)
    pub iat_us: i64,         // issued at (unix microseconds)
    pub exp: i64,            // expires at (unix timestamp)
    pub iss: String,         // issuer
    pub aud: String,         // audience
    pub domain: AuthDomain,  // trust domain
}
