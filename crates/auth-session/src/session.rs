//! Session management using FSM-based state tracking.
//!
//! [`SessionManager`] is the only owner of the signed-in user, the loading
//! counter and the last error. Work that spans an await (sign-in, refresh)
//! remembers the session epoch it started in; sign-out bumps the epoch, and a
//! result that lands in a newer epoch is discarded instead of committed.

use crate::claims::{AuthenticatedUser, TokenCodec};
use crate::endpoints::BrokerEndpoints;
use crate::error::LastError;
use crate::fsm::{SessionInput, SessionMachine, SessionState, SessionStateChanged};
use crate::http::HttpClient;
use crate::oauth::{
    AuthorizationAgent, AuthorizationRequest, OAuthFlow, OAuthState, ProviderConfig,
    RedirectOutcome,
};
use crate::refresh::{
    wait_for_outcome, RefreshCoordinator, RefreshOutcome, RefreshPolicy, RefreshReason,
    RefreshTicket,
};
use crate::token_store::SecureTokenStore;
use crate::transport::{
    BearerTransport, CookieTransport, RestoreOutcome, SessionTransport, SessionUpdate,
};
use crate::{AuthError, AuthResult};
use auth_config::{Config, Platform, Provider};
use auth_storage::{SecureStorage, TokenKeys};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Callback type for session state change notifications.
pub type SessionStateCallback = Box<dyn Fn(SessionStateChanged) + Send + Sync>;

/// Everything a UI needs to render the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub platform: Platform,
    pub user: Option<AuthenticatedUser>,
    pub is_loading: bool,
    pub last_error: Option<LastError>,
    pub provider: Option<Provider>,
}

struct SessionInner {
    machine: SessionMachine,
    user: Option<AuthenticatedUser>,
    loading: u32,
    last_error: Option<LastError>,
    provider: Option<Provider>,
    epoch: u64,
    sign_in_epoch: Option<u64>,
    restore_started: bool,
}

struct StateChange {
    old: SessionState,
    new: SessionState,
    payload: SessionStateChanged,
}

/// Decrements the loading counter on every exit path.
struct LoadingGuard<'a> {
    inner: &'a Mutex<SessionInner>,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        inner.loading = inner.loading.saturating_sub(1);
    }
}

/// Authentication session for one user of one app instance.
pub struct SessionManager {
    config: Config,
    endpoints: BrokerEndpoints,
    pub(crate) http: Arc<dyn HttpClient>,
    pub(crate) transport: Arc<dyn SessionTransport>,
    store: SecureTokenStore,
    oauth: OAuthFlow,
    refresh: RefreshCoordinator,
    inner: Mutex<SessionInner>,
    state_callback: Mutex<Option<Arc<dyn Fn(SessionStateChanged) + Send + Sync>>>,
}

impl SessionManager {
    /// Build a session for `config.platform`.
    ///
    /// Native sessions keep tokens in `storage`; web sessions rely on the
    /// HTTP client's cookie store, so `storage` is normally a `NoopStorage`.
    pub fn new(
        config: &Config,
        http: Arc<dyn HttpClient>,
        storage: Arc<dyn SecureStorage>,
    ) -> AuthResult<Self> {
        config.validate()?;
        let endpoints = BrokerEndpoints::from_config(config)?;
        let store = SecureTokenStore::new(
            storage,
            TokenKeys::new(&config.access_token_key, &config.refresh_token_key),
        );
        let transport: Arc<dyn SessionTransport> = match config.platform {
            Platform::Web => Arc::new(CookieTransport::new(http.clone(), endpoints.clone())),
            Platform::Native => Arc::new(BearerTransport::new(
                http.clone(),
                endpoints.clone(),
                store.clone(),
                config.expiry_skew_secs,
            )),
        };
        Self::with_transport(config, http, store, transport)
    }

    /// Build a session around an explicit transport.
    pub fn with_transport(
        config: &Config,
        http: Arc<dyn HttpClient>,
        store: SecureTokenStore,
        transport: Arc<dyn SessionTransport>,
    ) -> AuthResult<Self> {
        Ok(Self {
            config: config.clone(),
            endpoints: BrokerEndpoints::from_config(config)?,
            http,
            transport,
            store,
            oauth: OAuthFlow::new(),
            refresh: RefreshCoordinator::default(),
            inner: Mutex::new(SessionInner {
                machine: SessionMachine::new(),
                user: None,
                loading: 0,
                last_error: None,
                provider: None,
                epoch: 0,
                sign_in_epoch: None,
                restore_started: false,
            }),
            state_callback: Mutex::new(None),
        })
    }

    pub fn with_refresh_policy(mut self, policy: RefreshPolicy) -> Self {
        self.refresh = RefreshCoordinator::new(policy);
        self
    }

    /// Set a callback to be notified of session state changes.
    pub fn set_state_callback(&self, callback: SessionStateCallback) {
        *self.state_callback.lock() = Some(Arc::from(callback));
    }

    pub fn platform(&self) -> Platform {
        self.transport.platform()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn token_store(&self) -> &SecureTokenStore {
        &self.store
    }

    pub fn state(&self) -> SessionState {
        SessionState::from(self.inner.lock().machine.state())
    }

    pub fn user(&self) -> Option<AuthenticatedUser> {
        self.inner.lock().user.clone()
    }

    /// True until `restore()` settles and while any operation is running.
    pub fn is_loading(&self) -> bool {
        let inner = self.inner.lock();
        inner.loading > 0 || SessionState::from(inner.machine.state()) == SessionState::Restoring
    }

    pub fn last_error(&self) -> Option<LastError> {
        self.inner.lock().last_error.clone()
    }

    pub fn clear_error(&self) {
        self.inner.lock().last_error = None;
    }

    pub fn provider(&self) -> Option<Provider> {
        self.inner.lock().provider
    }

    pub fn oauth_state(&self) -> OAuthState {
        self.oauth.state()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock();
        let state = SessionState::from(inner.machine.state());
        SessionSnapshot {
            state,
            platform: self.transport.platform(),
            user: inner.user.clone(),
            is_loading: inner.loading > 0 || state == SessionState::Restoring,
            last_error: inner.last_error.clone(),
            provider: inner.provider,
        }
    }

    /// Inspect stored credentials and settle the initial state. Runs once;
    /// later calls return the current state.
    pub async fn restore(&self) -> SessionState {
        let epoch = {
            let mut inner = self.inner.lock();
            if inner.restore_started {
                return SessionState::from(inner.machine.state());
            }
            inner.restore_started = true;
            inner.epoch
        };
        let _loading = self.loading();

        let outcome = match self.transport.restore().await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Session restore failed");
                self.record_error(&e);
                RestoreOutcome::SignedOut
            }
        };

        match outcome {
            RestoreOutcome::SignedIn(user) => {
                info!(user_id = %user.sub, "Session restored");
                let provider = user.provider.as_deref().and_then(|p| p.parse().ok());
                self.commit(epoch, SessionState::Restoring, SessionInput::SessionValid, |inner| {
                    inner.user = Some(user);
                    inner.provider = provider;
                    Ok(())
                });
            }
            RestoreOutcome::SignedOut => {
                info!("No stored session");
                self.commit(epoch, SessionState::Restoring, SessionInput::NoSession, |_| Ok(()));
            }
            RestoreOutcome::NeedsRefresh => {
                let RefreshTicket::Leader(guard) = self.refresh.begin() else {
                    self.commit(epoch, SessionState::Restoring, SessionInput::NoSession, |_| Ok(()));
                    return self.state();
                };
                if self.commit(epoch, SessionState::Restoring, SessionInput::SessionExpired, |_| Ok(())) {
                    let outcome = self
                        .run_refresh(epoch, RefreshReason::Proactive, None)
                        .await;
                    guard.finish(outcome);
                }
            }
        }

        self.state()
    }

    /// Sign in with `provider`, using `agent` to show the consent screen.
    ///
    /// Returns the current user without launching anything when already
    /// signed in.
    pub async fn sign_in(
        &self,
        provider: Provider,
        agent: &dyn AuthorizationAgent,
    ) -> AuthResult<AuthenticatedUser> {
        if let Some(user) = self.signed_in_user() {
            info!(user_id = %user.sub, "Already signed in");
            return Ok(user);
        }
        let _loading = self.loading();

        let request = self.begin_sign_in(provider, &agent.redirect_uri(provider))?;
        let outcome = agent.authorize(&request).await;
        self.complete_sign_in(outcome).await
    }

    /// Issue a fresh authorization request and enter `Authenticating`.
    /// The caller delivers the provider's answer to [`complete_sign_in`](Self::complete_sign_in).
    pub fn begin_sign_in(
        &self,
        provider: Provider,
        redirect_uri: &str,
    ) -> AuthResult<AuthorizationRequest> {
        let discovery = match ProviderConfig::for_provider(provider, &self.config, &self.endpoints)
        {
            Ok(discovery) => discovery,
            Err(e) => {
                warn!(provider = %provider, error = %e, "Provider is not configured");
                self.record_error(&e);
                return Err(e);
            }
        };
        let request = AuthorizationRequest::new(&discovery, redirect_uri);
        self.oauth.begin(request.clone())?;

        let entered = self.transition(SessionInput::SignInStarted, |inner| {
            inner.provider = Some(provider);
            inner.last_error = None;
            inner.sign_in_epoch = Some(inner.epoch);
        });
        if let Err(e) = entered {
            self.oauth.reset();
            return Err(e);
        }

        info!(provider = %provider, "Authorization request issued");
        Ok(request)
    }

    /// Resolve the pending sign-in with what the agent reported.
    pub async fn complete_sign_in(
        &self,
        outcome: AuthResult<RedirectOutcome>,
    ) -> AuthResult<AuthenticatedUser> {
        let Some(epoch) = self.inner.lock().sign_in_epoch else {
            return Err(AuthError::InvalidStateTransition(
                "no sign in is pending".to_string(),
            ));
        };
        let _loading = self.loading();

        let redirect = match outcome {
            Ok(redirect) => redirect,
            Err(e) => {
                self.oauth.fail();
                return Err(self.fail_sign_in(epoch, e));
            }
        };

        let grant = match self.oauth.handle_redirect(redirect) {
            Ok(Some(grant)) => grant,
            Ok(None) => {
                return Err(AuthError::InvalidStateTransition(
                    "no authorization request is pending".to_string(),
                ))
            }
            Err(e) => return Err(self.fail_sign_in(epoch, e)),
        };

        let update = match self.transport.exchange(&grant).await {
            Ok(update) => update,
            Err(e) => {
                self.oauth.reset();
                return Err(self.fail_sign_in(epoch, e));
            }
        };

        let user = update.user.clone();
        let committed = self.commit_update(
            epoch,
            SessionState::Authenticating,
            SessionInput::SignInSucceeded,
            update,
        );
        match committed {
            Ok(true) => {
                info!(user_id = %user.sub, provider = ?self.provider(), "Signed in");
                Ok(user)
            }
            Ok(false) => {
                self.revoke_superseded().await;
                Err(AuthError::InvalidStateTransition(
                    "sign in was superseded by sign out".to_string(),
                ))
            }
            Err(e) => {
                self.oauth.reset();
                Err(self.fail_sign_in(epoch, e))
            }
        }
    }

    /// Drop the session locally and at the broker. Idempotent.
    pub async fn sign_out(&self) {
        let _loading = self.loading();
        let _ = self.transition(SessionInput::SignOut, |inner| {
            inner.user = None;
            inner.provider = None;
            inner.last_error = None;
            inner.sign_in_epoch = None;
            inner.epoch += 1;
        });
        self.teardown().await;
        info!("Signed out");
    }

    /// Refresh the session. Returns the new access token on native success,
    /// `None` on web, on failure, or when another refresh is running.
    pub async fn refresh(
        &self,
        reason: RefreshReason,
        refresh_token: Option<&str>,
    ) -> Option<String> {
        self.refresh_outcome(reason, refresh_token)
            .await
            .access_token()
    }

    /// Like [`refresh`](Self::refresh), reporting how the attempt ended.
    pub async fn refresh_outcome(
        &self,
        reason: RefreshReason,
        refresh_token: Option<&str>,
    ) -> RefreshOutcome {
        let guard = match self.refresh.begin() {
            RefreshTicket::Leader(guard) => guard,
            RefreshTicket::Follower(rx) => return wait_for_outcome(rx).await,
            RefreshTicket::Busy => {
                debug!(reason = %reason, "Refresh skipped, another is in flight");
                return RefreshOutcome::Skipped;
            }
        };

        let mut epoch = 0;
        if let Err(e) = self.transition(SessionInput::RefreshStarted, |inner| epoch = inner.epoch) {
            debug!(reason = %reason, error = %e, "Refresh not possible in current state");
            guard.finish(RefreshOutcome::Skipped);
            return RefreshOutcome::Skipped;
        }
        let _loading = self.loading();

        let outcome = self.run_refresh(epoch, reason, refresh_token).await;
        guard.finish(outcome.clone());
        outcome
    }

    /// Refresh ahead of expiry when the active credential expires within
    /// `expiry_skew_secs`. Returns whether a usable session exists afterwards.
    pub async fn ensure_fresh(&self) -> bool {
        let Some(user) = self.signed_in_user() else {
            return false;
        };

        let exp = match self.transport.platform() {
            Platform::Native => self
                .store
                .access_token()
                .and_then(|token| TokenCodec::decode(&token).ok())
                .and_then(|claims| claims.exp),
            Platform::Web => user.cookie_expiration.or(user.exp),
        };
        let now = crate::claims::unix_now();
        let fresh = exp.is_some_and(|exp| exp > now.saturating_add(self.config.expiry_skew_secs as i64));
        if fresh {
            return true;
        }

        debug!(user_id = %user.sub, "Credential close to expiry, refreshing");
        self.refresh_outcome(RefreshReason::Proactive, None).await;
        self.state().is_authenticated()
    }

    pub(crate) fn record_error(&self, error: &AuthError) {
        self.inner.lock().last_error = Some(LastError::from(error));
    }

    fn signed_in_user(&self) -> Option<AuthenticatedUser> {
        let inner = self.inner.lock();
        match SessionState::from(inner.machine.state()) {
            SessionState::SignedIn => inner.user.clone(),
            _ => None,
        }
    }

    fn loading(&self) -> LoadingGuard<'_> {
        self.inner.lock().loading += 1;
        LoadingGuard { inner: &self.inner }
    }

    async fn run_refresh(
        &self,
        epoch: u64,
        reason: RefreshReason,
        refresh_token: Option<&str>,
    ) -> RefreshOutcome {
        info!(reason = %reason, platform = %self.transport.platform(), "Refreshing session");

        let error = match self.transport.refresh(refresh_token).await {
            Ok(update) => {
                let access_token = update.tokens.as_ref().map(|t| t.access_token.clone());
                match self.commit_update(
                    epoch,
                    SessionState::Refreshing,
                    SessionInput::RefreshSucceeded,
                    update,
                ) {
                    Ok(true) => return RefreshOutcome::Refreshed { access_token },
                    Ok(false) => {
                        self.revoke_superseded().await;
                        return RefreshOutcome::Failed;
                    }
                    Err(e) => e,
                }
            }
            Err(e) => e,
        };

        warn!(reason = %reason, error = %error, "Refresh failed, signing out");
        let signed_out = self.commit(epoch, SessionState::Refreshing, SessionInput::RefreshFailed, |inner| {
            inner.user = None;
            inner.provider = None;
            inner.sign_in_epoch = None;
            inner.last_error = Some(LastError::from(&error));
            inner.epoch += 1;
            Ok(())
        });
        if signed_out {
            self.teardown().await;
        }
        RefreshOutcome::Failed
    }

    /// Commit an exchange or refresh result: persist tokens, publish the user.
    fn commit_update(
        &self,
        epoch: u64,
        expected: SessionState,
        input: SessionInput,
        update: SessionUpdate,
    ) -> AuthResult<bool> {
        let SessionUpdate { user, tokens } = update;
        let mut failure = None;
        let committed = self.commit(epoch, expected, input, |inner| {
            if let Some(tokens) = &tokens {
                if let Err(e) = self.store.save_pair(tokens) {
                    failure = Some(AuthError::Storage(e));
                    return Err(());
                }
            }
            inner.user = Some(user);
            inner.last_error = None;
            inner.sign_in_epoch = None;
            Ok(())
        });
        match failure {
            Some(e) => Err(e),
            None => Ok(committed),
        }
    }

    /// Apply `input` if the session is still in `epoch` and `expected` state.
    /// `apply` runs under the same lock and can veto the transition.
    fn commit(
        &self,
        epoch: u64,
        expected: SessionState,
        input: SessionInput,
        apply: impl FnOnce(&mut SessionInner) -> Result<(), ()>,
    ) -> bool {
        let change = {
            let mut inner = self.inner.lock();
            let current = SessionState::from(inner.machine.state());
            if inner.epoch != epoch || current != expected {
                debug!(input = ?input, state = %current, "Discarding result from a superseded session");
                return false;
            }
            if apply(&mut inner).is_err() {
                return false;
            }
            match Self::consume(&mut inner, &input) {
                Ok(change) => change,
                Err(e) => {
                    warn!(error = %e, "Commit rejected by state machine");
                    return false;
                }
            }
        };
        self.announce(change);
        true
    }

    /// Transition the FSM and notify the callback if the state changed.
    fn transition(
        &self,
        input: SessionInput,
        apply: impl FnOnce(&mut SessionInner),
    ) -> AuthResult<SessionState> {
        let change = {
            let mut inner = self.inner.lock();
            let change = Self::consume(&mut inner, &input)?;
            apply(&mut inner);
            StateChange {
                payload: Self::payload(&inner),
                ..change
            }
        };
        let new = change.new;
        self.announce(change);
        Ok(new)
    }

    fn consume(inner: &mut SessionInner, input: &SessionInput) -> AuthResult<StateChange> {
        let old = SessionState::from(inner.machine.state());
        inner.machine.consume(input).map_err(|_| {
            AuthError::InvalidStateTransition(format!("Cannot apply {:?} in state {:?}", input, old))
        })?;
        Ok(StateChange {
            old,
            new: SessionState::from(inner.machine.state()),
            payload: Self::payload(inner),
        })
    }

    fn payload(inner: &SessionInner) -> SessionStateChanged {
        SessionStateChanged {
            state: SessionState::from(inner.machine.state()),
            user_id: inner.user.as_ref().map(|u| u.sub.clone()),
            email: inner.user.as_ref().and_then(|u| u.email.clone()),
        }
    }

    fn announce(&self, change: StateChange) {
        if change.old == change.new {
            return;
        }
        debug!(
            old_state = ?change.old,
            new_state = ?change.new,
            "Session state transition"
        );
        // Called outside the lock so the callback may replace itself
        let callback = self.state_callback.lock().clone();
        if let Some(callback) = callback {
            callback(change.payload);
        }
    }

    /// Resolve `Authenticating` to `SignedOut`. Cancellation is not an error.
    fn fail_sign_in(&self, epoch: u64, error: AuthError) -> AuthError {
        let cancelled = matches!(error, AuthError::UserCancelled);
        let input = if cancelled {
            info!("Sign in cancelled");
            SessionInput::SignInCancelled
        } else {
            warn!(error = %error, "Sign in failed");
            SessionInput::SignInFailed
        };
        let last_error = (!cancelled).then(|| LastError::from(&error));
        self.commit(epoch, SessionState::Authenticating, input, |inner| {
            inner.user = None;
            inner.provider = None;
            inner.sign_in_epoch = None;
            inner.last_error = last_error;
            Ok(())
        });
        error
    }

    /// A response that lost the race with sign-out may already have
    /// delivered credentials (web cookies land in the jar before the commit
    /// is refused). Revoke them unless a new session started since.
    async fn revoke_superseded(&self) {
        if self.state() != SessionState::SignedOut {
            return;
        }
        debug!("Revoking credentials delivered after sign out");
        if let Err(e) = self.transport.sign_out().await {
            warn!(error = %e, "Credential cleanup failed");
        }
    }

    async fn teardown(&self) {
        self.oauth.reset();
        if let Err(e) = self.transport.sign_out().await {
            warn!(error = %e, "Credential cleanup failed");
        }
    }
}
