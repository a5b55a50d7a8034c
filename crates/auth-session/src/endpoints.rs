//! Token broker endpoint URLs.

use crate::AuthResult;
use auth_config::{Config, Provider};
use url::Url;

/// Resolved `/api/*` endpoints of the token broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoints {
    pub authorize: Url,
    pub callback: Url,
    pub token: Url,
    pub github_token: Url,
    pub session: Url,
    pub refresh: Url,
    pub logout: Url,
}

impl BrokerEndpoints {
    pub fn from_config(config: &Config) -> AuthResult<Self> {
        Ok(Self {
            authorize: config.endpoint("/api/auth/authorize")?,
            callback: config.endpoint("/api/auth/callback")?,
            token: config.endpoint("/api/auth/token")?,
            github_token: config.endpoint("/api/github/token")?,
            session: config.endpoint("/api/auth/session")?,
            refresh: config.endpoint("/api/auth/refresh")?,
            logout: config.endpoint("/api/auth/logout")?,
        })
    }

    /// Exchange endpoint for codes issued by `provider`.
    pub fn token_for(&self, provider: Provider) -> &Url {
        match provider {
            Provider::Google => &self.token,
            Provider::Github => &self.github_token,
        }
    }
}
