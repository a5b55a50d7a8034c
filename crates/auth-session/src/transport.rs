//! How credentials travel: HTTP-only cookies on web, bearer tokens on native.
//!
//! Transports talk to the broker and report what they learned. They never
//! commit session state; [`crate::SessionManager`] does that, so a sign-out
//! racing an in-flight refresh cannot be undone by the refresh landing late.

use crate::claims::{AuthenticatedUser, Claims, TokenCodec};
use crate::endpoints::BrokerEndpoints;
use crate::exchange::{ExchangeResponse, TokenExchangeClient};
use crate::http::{HttpClient, HttpRequest};
use crate::oauth::AuthorizationGrant;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::token_store::{SecureTokenStore, TokenPair};
use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use auth_config::Platform;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a successful exchange or refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionUpdate {
    pub user: AuthenticatedUser,
    /// Native only: the pair to persist.
    pub tokens: Option<TokenPair>,
}

/// What startup found.
#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    SignedIn(AuthenticatedUser),
    /// No usable access token, but a refresh may recover the session.
    NeedsRefresh,
    SignedOut,
}

#[async_trait]
pub trait SessionTransport: Send + Sync {
    fn platform(&self) -> Platform;

    /// Inspect whatever credentials survived the last run.
    async fn restore(&self) -> AuthResult<RestoreOutcome>;

    /// Redeem an authorization code.
    async fn exchange(&self, grant: &AuthorizationGrant) -> AuthResult<SessionUpdate>;

    /// Renew the session. `refresh_token` overrides the stored one (native).
    async fn refresh(&self, refresh_token: Option<&str>) -> AuthResult<SessionUpdate>;

    /// Attach the current credentials to an outgoing request.
    fn authorize_request(&self, request: HttpRequest) -> HttpRequest;

    /// Drop credentials locally and at the broker.
    async fn sign_out(&self) -> AuthResult<()>;
}

/// Web transport. The broker keeps the session in HTTP-only cookies, which
/// the HTTP client stores and replays; nothing is persisted here.
pub struct CookieTransport {
    http: Arc<dyn HttpClient>,
    endpoints: BrokerEndpoints,
    exchange: TokenExchangeClient,
    retry: RetryPolicy,
}

impl CookieTransport {
    pub fn new(http: Arc<dyn HttpClient>, endpoints: BrokerEndpoints) -> Self {
        Self {
            exchange: TokenExchangeClient::new(http.clone(), Platform::Web),
            http,
            endpoints,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Ask the Session endpoint who the cookie belongs to.
    /// `Ok(None)` means the broker answered 401.
    async fn fetch_session(&self) -> AuthResult<Option<AuthenticatedUser>> {
        let response = retry_with_backoff(&self.retry, move || async move {
            let response = self
                .http
                .send(HttpRequest::get(self.endpoints.session.clone()))
                .await?;
            if response.status >= 500 {
                return Err(AuthError::Network(format!(
                    "session endpoint returned {}",
                    response.status
                )));
            }
            Ok(response)
        })
        .await?;

        if response.is_unauthorized() {
            debug!("Session endpoint reports no session");
            return Ok(None);
        }
        if !response.is_success() {
            return Err(AuthError::TokenInvalid(format!(
                "session endpoint returned {}",
                response.status
            )));
        }

        let claims: Claims = response.json()?;
        let user = AuthenticatedUser::from_claims(&claims)
            .ok_or_else(|| AuthError::TokenInvalid("session has no subject".to_string()))?;
        Ok(Some(user))
    }
}

#[async_trait]
impl SessionTransport for CookieTransport {
    fn platform(&self) -> Platform {
        Platform::Web
    }

    async fn restore(&self) -> AuthResult<RestoreOutcome> {
        Ok(match self.fetch_session().await? {
            Some(user) => RestoreOutcome::SignedIn(user),
            // The access cookie may have lapsed while the refresh cookie is still good.
            None => RestoreOutcome::NeedsRefresh,
        })
    }

    async fn exchange(&self, grant: &AuthorizationGrant) -> AuthResult<SessionUpdate> {
        match self.exchange.exchange(grant).await? {
            ExchangeResponse::Cookie { .. } => {}
            ExchangeResponse::Tokens(_) => {
                return Err(AuthError::Exchange(
                    "broker returned tokens to a cookie session".to_string(),
                ))
            }
        }
        let user = self.fetch_session().await?.ok_or_else(|| {
            AuthError::Exchange("session cookie was not accepted".to_string())
        })?;
        Ok(SessionUpdate { user, tokens: None })
    }

    async fn refresh(&self, _refresh_token: Option<&str>) -> AuthResult<SessionUpdate> {
        let response = self
            .http
            .send(HttpRequest::post(self.endpoints.refresh.clone()).json(json!({ "platform": "web" })))
            .await?;

        if !response.is_success() {
            let message = response
                .error_message()
                .unwrap_or_else(|| format!("status {}", response.status));
            return Err(AuthError::RefreshFailed(message));
        }

        let user = self.fetch_session().await?.ok_or_else(|| {
            AuthError::RefreshFailed("session not confirmed after refresh".to_string())
        })?;
        Ok(SessionUpdate { user, tokens: None })
    }

    fn authorize_request(&self, request: HttpRequest) -> HttpRequest {
        // Cookies ride along from the client's cookie store.
        request
    }

    async fn sign_out(&self) -> AuthResult<()> {
        let response = self
            .http
            .send(HttpRequest::post(self.endpoints.logout.clone()))
            .await?;
        if !response.is_success() {
            warn!(status = response.status, "Logout endpoint returned an error");
        }
        Ok(())
    }
}

/// Native transport. Tokens live in [`SecureTokenStore`] and are read from it
/// for every request.
pub struct BearerTransport {
    http: Arc<dyn HttpClient>,
    endpoints: BrokerEndpoints,
    store: SecureTokenStore,
    exchange: TokenExchangeClient,
    expiry_skew_secs: u64,
}

impl BearerTransport {
    pub fn new(
        http: Arc<dyn HttpClient>,
        endpoints: BrokerEndpoints,
        store: SecureTokenStore,
        expiry_skew_secs: u64,
    ) -> Self {
        Self {
            exchange: TokenExchangeClient::new(http.clone(), Platform::Native),
            http,
            endpoints,
            store,
            expiry_skew_secs,
        }
    }

    /// Project the user from a freshly issued access token. A token that is
    /// already expired on arrival never becomes a signed-in user.
    fn user_from_access_token(&self, access_token: &str) -> AuthResult<AuthenticatedUser> {
        let claims = TokenCodec::decode(access_token)
            .map_err(|e| AuthError::TokenInvalid(e.to_string()))?;
        if TokenCodec::is_expired(&claims, self.expiry_skew_secs, crate::claims::unix_now()) {
            return Err(AuthError::TokenInvalid(
                "issued access token is already expired".to_string(),
            ));
        }
        let missing = claims.missing_profile_fields();
        if !missing.is_empty() {
            warn!(missing = ?missing, "Access token lacks profile fields");
        }
        AuthenticatedUser::from_claims(&claims)
            .ok_or_else(|| AuthError::TokenInvalid("token has no subject".to_string()))
    }
}

#[async_trait]
impl SessionTransport for BearerTransport {
    fn platform(&self) -> Platform {
        Platform::Native
    }

    async fn restore(&self) -> AuthResult<RestoreOutcome> {
        let access_token = self.store.access_token();
        let has_refresh = self.store.refresh_token().is_some();

        let Some(access_token) = access_token else {
            return Ok(if has_refresh {
                RestoreOutcome::NeedsRefresh
            } else {
                RestoreOutcome::SignedOut
            });
        };

        match TokenCodec::decode(&access_token) {
            Ok(claims)
                if !TokenCodec::is_expired(
                    &claims,
                    self.expiry_skew_secs,
                    crate::claims::unix_now(),
                ) =>
            {
                if let Some(user) = AuthenticatedUser::from_claims(&claims) {
                    return Ok(RestoreOutcome::SignedIn(user));
                }
                warn!("Stored access token has no subject");
            }
            Ok(_) => debug!("Stored access token has expired"),
            Err(e) => warn!(error = %e, "Stored access token could not be decoded"),
        }

        Ok(if has_refresh {
            RestoreOutcome::NeedsRefresh
        } else {
            RestoreOutcome::SignedOut
        })
    }

    async fn exchange(&self, grant: &AuthorizationGrant) -> AuthResult<SessionUpdate> {
        let pair = match self.exchange.exchange(grant).await? {
            ExchangeResponse::Tokens(pair) => pair,
            ExchangeResponse::Cookie { .. } => {
                return Err(AuthError::Exchange(
                    "broker set a cookie for a native session".to_string(),
                ))
            }
        };
        let user = self.user_from_access_token(&pair.access_token)?;
        Ok(SessionUpdate {
            user,
            tokens: Some(pair),
        })
    }

    async fn refresh(&self, refresh_token: Option<&str>) -> AuthResult<SessionUpdate> {
        let refresh_token = match refresh_token {
            Some(token) if !token.is_empty() => token.to_string(),
            _ => self
                .store
                .refresh_token()
                .ok_or_else(|| AuthError::RefreshFailed("no refresh token".to_string()))?,
        };

        let request = HttpRequest::post(self.endpoints.refresh.clone()).json(json!({
            "platform": "native",
            "refreshToken": refresh_token,
        }));
        let response = self.http.send(request).await?;

        if !response.is_success() {
            let message = response
                .error_message()
                .unwrap_or_else(|| format!("status {}", response.status));
            return Err(AuthError::RefreshFailed(message));
        }

        let pair: TokenPair = response.json()?;
        let user = self.user_from_access_token(&pair.access_token)?;
        info!(user_id = %user.sub, "Tokens refreshed");
        Ok(SessionUpdate {
            user,
            tokens: Some(pair),
        })
    }

    fn authorize_request(&self, request: HttpRequest) -> HttpRequest {
        match self.store.access_token() {
            Some(token) => request.bearer(&token),
            None => request.without_header("Authorization"),
        }
    }

    async fn sign_out(&self) -> AuthResult<()> {
        self.store.clear()?;
        Ok(())
    }
}
