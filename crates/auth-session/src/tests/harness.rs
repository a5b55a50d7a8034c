//! Shared fixtures for session-level tests.

use crate::http::{HttpClient, HttpRequest, HttpResponse};
use crate::oauth::{AuthorizationAgent, AuthorizationRequest, RedirectOutcome};
use crate::session::SessionManager;
use crate::{AuthError, AuthResult, SessionStateChanged};
use async_trait::async_trait;
use auth_config::{Config, Platform, Provider};
use auth_storage::{MemoryStorage, SecureStorage};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub(crate) const BROKER: &str = "https://broker.example.com";
pub(crate) const REFRESH: &str = "/api/auth/refresh";
pub(crate) const SESSION: &str = "/api/auth/session";
pub(crate) const TOKEN: &str = "/api/auth/token";
pub(crate) const LOGOUT: &str = "/api/auth/logout";
pub(crate) const API: &str = "/courses";

/// Scripted HTTP client. Responses are queued per path; every request is
/// recorded. Unscripted paths answer 404.
#[derive(Default)]
pub(crate) struct MockHttp {
    routes: Mutex<HashMap<String, VecDeque<AuthResult<HttpResponse>>>>,
    delays: Mutex<HashMap<String, Duration>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockHttp {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn push(&self, path: &str, response: HttpResponse) {
        self.routes
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(Ok(response));
    }

    pub(crate) fn push_json(&self, path: &str, status: u16, body: Value) {
        self.push(path, HttpResponse::json_body(status, &body));
    }

    pub(crate) fn push_err(&self, path: &str, error: AuthError) {
        self.routes
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(Err(error));
    }

    /// Hold responses for `path` so concurrent callers overlap.
    pub(crate) fn delay(&self, path: &str, delay: Duration) {
        self.delays.lock().insert(path.to_string(), delay);
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub(crate) fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.url.path() == path)
            .cloned()
            .collect()
    }

    pub(crate) fn calls(&self, path: &str) -> usize {
        self.requests_to(path).len()
    }
}

#[async_trait]
impl HttpClient for MockHttp {
    async fn send(&self, request: HttpRequest) -> AuthResult<HttpResponse> {
        let path = request.url.path().to_string();
        self.requests.lock().push(request);

        let delay = self.delays.lock().get(&path).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.routes.lock().get_mut(&path).and_then(VecDeque::pop_front);
        next.unwrap_or_else(|| Ok(HttpResponse::new(404, "unscripted")))
    }
}

/// How the scripted consent screen answers.
pub(crate) enum AgentReply {
    Approve(&'static str),
    ApproveWithState(&'static str, &'static str),
    Cancel,
    Deny(&'static str),
    Fail(AuthError),
}

/// [`AuthorizationAgent`] that answers from a script instead of a browser.
pub(crate) struct ScriptedAgent {
    replies: Mutex<VecDeque<AgentReply>>,
    pub(crate) launched: Mutex<Vec<AuthorizationRequest>>,
}

impl ScriptedAgent {
    pub(crate) fn new(replies: Vec<AgentReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            launched: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AuthorizationAgent for ScriptedAgent {
    fn redirect_uri(&self, _provider: Provider) -> String {
        "authsession://".to_string()
    }

    async fn authorize(&self, request: &AuthorizationRequest) -> AuthResult<RedirectOutcome> {
        self.launched.lock().push(request.clone());
        let reply = self.replies.lock().pop_front().unwrap_or(AgentReply::Cancel);
        match reply {
            AgentReply::Approve(code) => Ok(RedirectOutcome::Success {
                code: code.to_string(),
                state: Some(request.state.clone()),
            }),
            AgentReply::ApproveWithState(code, state) => Ok(RedirectOutcome::Success {
                code: code.to_string(),
                state: Some(state.to_string()),
            }),
            AgentReply::Cancel => Ok(RedirectOutcome::Cancel),
            AgentReply::Deny(error) => Ok(RedirectOutcome::Error {
                error: error.to_string(),
                description: None,
            }),
            AgentReply::Fail(e) => Err(e),
        }
    }
}

/// Unsigned JWT with a full profile.
pub(crate) fn jwt(sub: &str, exp: i64) -> String {
    jwt_with(json!({
        "sub": sub,
        "name": "Ada Lovelace",
        "email": "ada@example.com",
        "picture": "https://example.com/ada.png",
        "provider": "google",
        "exp": exp
    }))
}

pub(crate) fn jwt_with(claims: Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}

pub(crate) fn now() -> i64 {
    crate::claims::unix_now()
}

pub(crate) fn config(platform: Platform) -> Config {
    Config {
        base_url: BROKER.to_string(),
        platform,
        ..Config::default()
    }
}

pub(crate) fn api_url() -> Url {
    Url::parse("https://api.example.com/courses").unwrap()
}

pub(crate) fn session_with(
    platform: Platform,
    http: &Arc<MockHttp>,
    storage: Arc<dyn SecureStorage>,
) -> SessionManager {
    SessionManager::new(&config(platform), http.clone(), storage).unwrap()
}

/// Native session over fresh in-memory storage.
pub(crate) fn native(http: &Arc<MockHttp>) -> (SessionManager, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    (session_with(Platform::Native, http, storage.clone()), storage)
}

pub(crate) fn web(http: &Arc<MockHttp>) -> SessionManager {
    session_with(Platform::Web, http, Arc::new(auth_storage::NoopStorage))
}

/// Collects every state change notification.
pub(crate) fn record_states(session: &SessionManager) -> Arc<Mutex<Vec<SessionStateChanged>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    session.set_state_callback(Box::new(move |payload| sink.lock().push(payload)));
    seen
}

/// Stored token by name.
pub(crate) fn stored(storage: &MemoryStorage, key: &str) -> Option<String> {
    storage.get(key).unwrap()
}

pub(crate) fn tokens_body(access: &str, refresh: &str) -> Value {
    json!({ "accessToken": access, "refreshToken": refresh })
}
