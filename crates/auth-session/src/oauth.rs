//! OAuth authorization-code flow with PKCE.
//!
//! ```text
//!            Begin                 Succeed
//!   Idle ─────────────► Requesting ─────────► Settled
//!    ▲                      │                    │
//!    └──── Cancel / Fail ───┘                    │
//!    └──────────────────── Reset ────────────────┘
//! ```
//!
//! Redirects are only acted on in `Requesting`. A duplicate delivery of an
//! already exchanged code arrives in `Settled` and is dropped.

use crate::endpoints::BrokerEndpoints;
use crate::pkce::{self, Pkce, CHALLENGE_METHOD};
use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use auth_config::{Config, Provider};
use parking_lot::Mutex;
use rust_fsm::*;
use tracing::{debug, info, warn};
use url::Url;

const GITHUB_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub oauth_machine(Idle)

    Idle => {
        Begin => Requesting,
        Reset => Idle
    },
    Requesting => {
        Succeed => Settled,
        Cancel => Idle,
        Fail => Idle,
        Reset => Idle
    },
    Settled => {
        Begin => Requesting,
        Reset => Idle
    }
}

pub use oauth_machine::Input as OAuthInput;
pub use oauth_machine::State as OAuthState;
pub use oauth_machine::StateMachine as OAuthMachine;

/// Where to send the user and which broker endpoint redeems the code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub client_id: String,
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    pub scopes: Vec<String>,
}

impl ProviderConfig {
    /// Discovery document for `provider`. A missing client id is a configuration error.
    pub fn for_provider(
        provider: Provider,
        config: &Config,
        endpoints: &BrokerEndpoints,
    ) -> AuthResult<Self> {
        let client_id = config.client_id(provider)?.to_string();
        let (authorization_endpoint, scopes) = match provider {
            // Google is brokered: the broker holds the real client secret.
            Provider::Google => (
                endpoints.authorize.clone(),
                vec!["openid", "email", "profile"],
            ),
            Provider::Github => (Url::parse(GITHUB_AUTHORIZE_URL)?, vec!["identity"]),
        };

        Ok(Self {
            provider,
            client_id,
            authorization_endpoint,
            token_endpoint: endpoints.token_for(provider).clone(),
            scopes: scopes.into_iter().map(String::from).collect(),
        })
    }
}

/// A launched (or about to be launched) authorization request.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub provider: Provider,
    pub url: Url,
    pub state: String,
    pub redirect_uri: String,
    pub token_endpoint: Url,
    pkce: Pkce,
}

impl AuthorizationRequest {
    /// Build a request with a fresh PKCE pair and state.
    pub fn new(provider: &ProviderConfig, redirect_uri: &str) -> Self {
        Self::with_pkce(provider, redirect_uri, Pkce::generate(), pkce::generate_state())
    }

    pub fn with_pkce(
        provider: &ProviderConfig,
        redirect_uri: &str,
        pkce: Pkce,
        state: String,
    ) -> Self {
        let mut url = provider.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &provider.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &provider.scopes.join(" "))
            .append_pair("state", &state)
            .append_pair("code_challenge", pkce.challenge())
            .append_pair("code_challenge_method", CHALLENGE_METHOD);

        Self {
            provider: provider.provider,
            url,
            state,
            redirect_uri: redirect_uri.to_string(),
            token_endpoint: provider.token_endpoint.clone(),
            pkce,
        }
    }

    pub fn code_verifier(&self) -> &str {
        self.pkce.verifier()
    }
}

/// What the provider sent back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectOutcome {
    Success { code: String, state: Option<String> },
    Cancel,
    Error {
        error: String,
        description: Option<String>,
    },
}

/// Everything the exchange step needs. Produced at most once per request.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationGrant {
    pub provider: Provider,
    pub code: String,
    pub code_verifier: String,
    pub redirect_uri: String,
    pub token_endpoint: Url,
}

impl std::fmt::Debug for AuthorizationGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationGrant")
            .field("provider", &self.provider)
            .field("code", &"[REDACTED]")
            .field("code_verifier", &"[REDACTED]")
            .field("redirect_uri", &self.redirect_uri)
            .field("token_endpoint", &self.token_endpoint.as_str())
            .finish()
    }
}

/// Presents the consent screen and waits for the redirect.
#[async_trait]
pub trait AuthorizationAgent: Send + Sync {
    /// Redirect URI registered for this agent.
    fn redirect_uri(&self, provider: Provider) -> String;

    /// Launch `request` and wait for the provider's answer.
    async fn authorize(&self, request: &AuthorizationRequest) -> AuthResult<RedirectOutcome>;
}

struct FlowInner {
    machine: OAuthMachine,
    pending: Option<AuthorizationRequest>,
}

/// Guards a single in-flight authorization request.
pub struct OAuthFlow {
    inner: Mutex<FlowInner>,
}

impl Default for OAuthFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl OAuthFlow {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(FlowInner {
                machine: OAuthMachine::new(),
                pending: None,
            }),
        }
    }

    pub fn state(&self) -> OAuthState {
        self.inner.lock().machine.state().clone()
    }

    /// Provider of the pending request, if one is waiting.
    pub fn pending_provider(&self) -> Option<Provider> {
        self.inner.lock().pending.as_ref().map(|r| r.provider)
    }

    /// Record `request` as the one awaiting a redirect.
    pub fn begin(&self, request: AuthorizationRequest) -> AuthResult<()> {
        let mut inner = self.inner.lock();
        if inner.machine.consume(&OAuthInput::Begin).is_err() {
            return Err(AuthError::FlowInProgress);
        }
        debug!(provider = %request.provider, "Authorization request pending");
        inner.pending = Some(request);
        Ok(())
    }

    /// Resolve the pending request with the provider's answer.
    ///
    /// Returns `Ok(None)` when no request is pending (the redirect is ignored),
    /// `Ok(Some(grant))` exactly once per successful request.
    pub fn handle_redirect(
        &self,
        outcome: RedirectOutcome,
    ) -> AuthResult<Option<AuthorizationGrant>> {
        let mut inner = self.inner.lock();
        if *inner.machine.state() != OAuthState::Requesting {
            debug!(state = ?inner.machine.state(), "Ignoring redirect outside of a pending request");
            return Ok(None);
        }
        let Some(request) = inner.pending.take() else {
            let _ = inner.machine.consume(&OAuthInput::Fail);
            return Ok(None);
        };

        match outcome {
            RedirectOutcome::Success { code, state } => {
                if state.as_deref() != Some(request.state.as_str()) {
                    warn!(provider = %request.provider, "Redirect state does not match request");
                    let _ = inner.machine.consume(&OAuthInput::Fail);
                    return Err(AuthError::StateMismatch);
                }
                if code.is_empty() {
                    let _ = inner.machine.consume(&OAuthInput::Fail);
                    return Err(AuthError::MissingAuthorizationCode);
                }
                let _ = inner.machine.consume(&OAuthInput::Succeed);
                info!(provider = %request.provider, "Authorization code received");
                Ok(Some(AuthorizationGrant {
                    provider: request.provider,
                    code,
                    code_verifier: request.code_verifier().to_string(),
                    redirect_uri: request.redirect_uri.clone(),
                    token_endpoint: request.token_endpoint.clone(),
                }))
            }
            RedirectOutcome::Cancel => {
                let _ = inner.machine.consume(&OAuthInput::Cancel);
                info!(provider = %request.provider, "Sign in cancelled");
                Err(AuthError::UserCancelled)
            }
            RedirectOutcome::Error { error, description } => {
                let _ = inner.machine.consume(&OAuthInput::Fail);
                warn!(provider = %request.provider, error = %error, "Provider returned an error");
                Err(AuthError::Provider { error, description })
            }
        }
    }

    /// Abandon the pending request (agent failure, timeout).
    pub fn fail(&self) {
        let mut inner = self.inner.lock();
        inner.pending = None;
        let _ = inner.machine.consume(&OAuthInput::Fail);
    }

    /// Back to `Idle` from any state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.pending = None;
        let _ = inner.machine.consume(&OAuthInput::Reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn google() -> ProviderConfig {
        let config = Config {
            base_url: "https://broker.example.com".to_string(),
            ..Config::default()
        };
        let endpoints = BrokerEndpoints::from_config(&config).unwrap();
        ProviderConfig::for_provider(Provider::Google, &config, &endpoints).unwrap()
    }

    fn request() -> AuthorizationRequest {
        AuthorizationRequest::with_pkce(
            &google(),
            "authsession://",
            Pkce::from_verifier("verifier-123"),
            "state-abc".to_string(),
        )
    }

    fn success(state: &str) -> RedirectOutcome {
        RedirectOutcome::Success {
            code: "code-1".to_string(),
            state: Some(state.to_string()),
        }
    }

    #[test]
    fn test_machine_transitions() {
        let mut machine = OAuthMachine::new();
        assert_eq!(*machine.state(), OAuthState::Idle);

        machine.consume(&OAuthInput::Begin).unwrap();
        assert_eq!(*machine.state(), OAuthState::Requesting);

        // A second request cannot start while one is pending
        assert!(machine.consume(&OAuthInput::Begin).is_err());

        machine.consume(&OAuthInput::Succeed).unwrap();
        assert_eq!(*machine.state(), OAuthState::Settled);

        // Responses are not accepted once settled
        assert!(machine.consume(&OAuthInput::Succeed).is_err());
        assert!(machine.consume(&OAuthInput::Cancel).is_err());

        machine.consume(&OAuthInput::Reset).unwrap();
        assert_eq!(*machine.state(), OAuthState::Idle);
    }

    #[test]
    fn test_google_request_url() {
        let request = request();
        let pairs: std::collections::HashMap<_, _> = request.url.query_pairs().into_owned().collect();

        assert_eq!(request.url.path(), "/api/auth/authorize");
        assert_eq!(pairs["client_id"], "google");
        assert_eq!(pairs["redirect_uri"], "authsession://");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["scope"], "openid email profile");
        assert_eq!(pairs["state"], "state-abc");
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(
            pairs["code_challenge"],
            Pkce::from_verifier("verifier-123").challenge()
        );
        assert!(!request.url.as_str().contains("verifier-123"));
    }

    #[test]
    fn test_github_provider_config() {
        let mut config = Config::default();
        let endpoints = BrokerEndpoints::from_config(&config).unwrap();
        assert!(matches!(
            ProviderConfig::for_provider(Provider::Github, &config, &endpoints),
            Err(AuthError::Config(_))
        ));

        config.github_client_id = Some("gh-client".to_string());
        let github = ProviderConfig::for_provider(Provider::Github, &config, &endpoints).unwrap();
        assert_eq!(github.authorization_endpoint.as_str(), GITHUB_AUTHORIZE_URL);
        assert_eq!(github.scopes, vec!["identity".to_string()]);
        assert!(github.token_endpoint.path().ends_with("/api/github/token"));
    }

    #[test]
    fn test_success_yields_grant_once() {
        let flow = OAuthFlow::new();
        flow.begin(request()).unwrap();
        assert_eq!(flow.pending_provider(), Some(Provider::Google));

        let grant = flow.handle_redirect(success("state-abc")).unwrap().unwrap();
        assert_eq!(grant.code, "code-1");
        assert_eq!(grant.code_verifier, "verifier-123");
        assert_eq!(flow.state(), OAuthState::Settled);

        // Duplicate delivery of the same response is ignored
        assert!(flow.handle_redirect(success("state-abc")).unwrap().is_none());
    }

    #[test]
    fn test_redirect_without_request_is_ignored() {
        let flow = OAuthFlow::new();
        assert!(flow.handle_redirect(success("anything")).unwrap().is_none());
        assert_eq!(flow.state(), OAuthState::Idle);
    }

    #[test]
    fn test_cancel_returns_to_idle() {
        let flow = OAuthFlow::new();
        flow.begin(request()).unwrap();

        let result = flow.handle_redirect(RedirectOutcome::Cancel);
        assert!(matches!(result, Err(AuthError::UserCancelled)));
        assert_eq!(flow.state(), OAuthState::Idle);
        assert!(flow.pending_provider().is_none());

        // A new request can be issued
        flow.begin(request()).unwrap();
        assert_eq!(flow.state(), OAuthState::Requesting);
    }

    #[test]
    fn test_provider_error_returns_to_idle() {
        let flow = OAuthFlow::new();
        flow.begin(request()).unwrap();

        let result = flow.handle_redirect(RedirectOutcome::Error {
            error: "server_error".to_string(),
            description: None,
        });
        assert!(matches!(result, Err(AuthError::Provider { .. })));
        assert_eq!(flow.state(), OAuthState::Idle);
    }

    #[test]
    fn test_state_mismatch_rejected() {
        let flow = OAuthFlow::new();
        flow.begin(request()).unwrap();

        let result = flow.handle_redirect(success("forged"));
        assert!(matches!(result, Err(AuthError::StateMismatch)));
        assert_eq!(flow.state(), OAuthState::Idle);
    }

    #[test]
    fn test_empty_code_rejected() {
        let flow = OAuthFlow::new();
        flow.begin(request()).unwrap();

        let result = flow.handle_redirect(RedirectOutcome::Success {
            code: String::new(),
            state: Some("state-abc".to_string()),
        });
        assert!(matches!(result, Err(AuthError::MissingAuthorizationCode)));
    }

    #[test]
    fn test_begin_while_requesting_is_rejected() {
        let flow = OAuthFlow::new();
        flow.begin(request()).unwrap();
        assert!(matches!(flow.begin(request()), Err(AuthError::FlowInProgress)));

        flow.fail();
        assert_eq!(flow.state(), OAuthState::Idle);
    }

    #[test]
    fn test_grant_debug_redacts_secrets() {
        let flow = OAuthFlow::new();
        flow.begin(request()).unwrap();
        let grant = flow.handle_redirect(success("state-abc")).unwrap().unwrap();
        let debug = format!("{:?}", grant);
        assert!(!debug.contains("code-1"));
        assert!(!debug.contains("verifier-123"));
    }
}
