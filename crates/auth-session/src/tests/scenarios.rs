//! Native startup and sign-in scenarios.

use super::harness::*;
use crate::oauth::OAuthState;
use crate::{AuthError, AuthErrorKind, HttpRequest, SessionState};
use auth_config::Provider;

#[tokio::test]
async fn test_restore_without_tokens_signs_out() {
    let http = MockHttp::new();
    let (session, _storage) = native(&http);
    assert!(session.is_loading());

    let state = session.restore().await;

    assert_eq!(state, SessionState::SignedOut);
    assert!(!session.is_loading());
    assert!(session.user().is_none());
    assert!(session.last_error().is_none());
    assert!(http.requests().is_empty());
}

#[tokio::test]
async fn test_restore_with_valid_token_needs_no_network() {
    let http = MockHttp::new();
    let (session, storage) = native(&http);
    let access = jwt("user-1", now() + 3600);
    session
        .token_store()
        .save_pair(&crate::TokenPair::new(access.clone(), "refresh-1"))
        .unwrap();

    let state = session.restore().await;

    assert_eq!(state, SessionState::SignedIn);
    let user = session.user().unwrap();
    assert_eq!(user.sub, "user-1");
    assert_eq!(user.email.as_deref(), Some("ada@example.com"));
    assert_eq!(session.provider(), Some(Provider::Google));
    assert!(!session.is_loading());
    assert!(http.requests().is_empty());
    assert_eq!(stored(&storage, "accessToken"), Some(access));
}

#[tokio::test]
async fn test_restore_with_expired_token_refreshes_once() {
    let http = MockHttp::new();
    let (session, storage) = native(&http);
    session
        .token_store()
        .save_pair(&crate::TokenPair::new(jwt("user-1", now() - 60), "refresh-1"))
        .unwrap();
    let renewed = jwt("user-1", now() + 3600);
    http.push_json(REFRESH, 200, tokens_body(&renewed, "refresh-2"));

    let state = session.restore().await;

    assert_eq!(state, SessionState::SignedIn);
    assert_eq!(http.calls(REFRESH), 1);
    assert_eq!(stored(&storage, "accessToken"), Some(renewed));
    assert_eq!(stored(&storage, "refreshToken").as_deref(), Some("refresh-2"));
    assert_eq!(session.user().unwrap().sub, "user-1");
    assert!(!session.is_loading());
}

#[tokio::test]
async fn test_restore_rejects_refresh_with_expired_token() {
    let http = MockHttp::new();
    let (session, storage) = native(&http);
    session
        .token_store()
        .save_pair(&crate::TokenPair::new(jwt("user-1", now() - 60), "refresh-1"))
        .unwrap();
    http.push_json(REFRESH, 200, tokens_body(&jwt("user-1", now() - 30), "refresh-2"));

    let state = session.restore().await;

    assert_eq!(state, SessionState::SignedOut);
    assert_eq!(http.calls(REFRESH), 1);
    assert!(session.user().is_none());
    assert!(storage.is_empty());
    assert!(!session.is_loading());
}

#[tokio::test]
async fn test_restore_runs_once() {
    let http = MockHttp::new();
    let (session, _storage) = native(&http);
    session
        .token_store()
        .save_pair(&crate::TokenPair::new(jwt("user-1", now() - 60), "refresh-1"))
        .unwrap();
    http.push_json(REFRESH, 200, tokens_body(&jwt("user-1", now() + 3600), "r2"));

    session.restore().await;
    let state = session.restore().await;

    assert_eq!(state, SessionState::SignedIn);
    assert_eq!(http.calls(REFRESH), 1);
}

#[tokio::test]
async fn test_cancelled_sign_in_returns_to_idle() {
    let http = MockHttp::new();
    let (session, _storage) = native(&http);
    session.restore().await;
    let agent = ScriptedAgent::new(vec![AgentReply::Cancel]);

    let result = session.sign_in(Provider::Google, &agent).await;

    assert!(matches!(result, Err(AuthError::UserCancelled)));
    assert_eq!(session.oauth_state(), OAuthState::Idle);
    assert_eq!(session.state(), SessionState::SignedOut);
    assert!(session.last_error().is_none());
    assert!(session.provider().is_none());
    assert!(!session.is_loading());
    assert_eq!(http.calls(TOKEN), 0);

    // A new authorization request can be issued
    let first_state = agent.launched.lock()[0].state.clone();
    let request = session
        .begin_sign_in(Provider::Google, "authsession://")
        .unwrap();
    assert_ne!(request.state, first_state);
    assert_eq!(session.oauth_state(), OAuthState::Requesting);
    assert_eq!(session.state(), SessionState::Authenticating);
}

#[tokio::test]
async fn test_fetch_while_signed_out_returns_original_401() {
    let http = MockHttp::new();
    let (session, storage) = native(&http);
    session.restore().await;
    let states = record_states(&session);
    http.push_json(API, 401, serde_json::json!({ "error": "unauthorized" }));

    let response = session
        .fetch_with_auth(HttpRequest::get(api_url()))
        .await
        .unwrap();

    assert_eq!(response.status, 401);
    assert_eq!(response.error_message().as_deref(), Some("unauthorized"));

    // Sent once, without credentials
    let api_requests = http.requests_to(API);
    assert_eq!(api_requests.len(), 1);
    assert!(api_requests[0].header_value("Authorization").is_none());

    // Refresh was attempted, found no refresh token, and signed out
    assert_eq!(http.calls(REFRESH), 0);
    let states: Vec<_> = states.lock().iter().map(|s| s.state).collect();
    assert_eq!(states, vec![SessionState::Refreshing, SessionState::SignedOut]);
    assert_eq!(session.state(), SessionState::SignedOut);
    assert_eq!(
        session.last_error().map(|e| e.kind),
        Some(AuthErrorKind::RefreshFailed)
    );
    assert!(storage.is_empty());
    assert!(!session.is_loading());
}
