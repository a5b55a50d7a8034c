//! Authentication session core.
//!
//! This crate provides:
//! - OAuth authorization-code flow with PKCE and a loopback redirect receiver
//! - Code exchange and token refresh against the token broker
//! - Cookie (web) and bearer (native) session transports
//! - Single-flight refresh and authenticated fetch with one retry after 401
//! - Explicit FSM-based session state management

mod claims;
mod endpoints;
mod error;
mod exchange;
mod fetch;
mod fsm;
mod http;
mod loopback;
mod oauth;
mod pkce;
mod refresh;
mod retry;
mod session;
mod token_store;
mod transport;

#[cfg(test)]
mod tests;

pub use claims::{unix_now, AuthenticatedUser, Claims, DecodeError, TokenCodec};
pub use endpoints::BrokerEndpoints;
pub use error::{AuthError, AuthErrorKind, AuthResult, LastError};
pub use exchange::{ExchangeResponse, TokenExchangeClient};
pub use fsm::session_machine;
pub use fsm::{
    SessionInput, SessionMachine, SessionMachineState, SessionState, SessionStateChanged,
};
pub use http::{HttpClient, HttpRequest, HttpResponse, Method, ReqwestClient, RequestBody};
pub use loopback::{parse_callback, Launcher, LoopbackAgent};
pub use oauth::{
    AuthorizationAgent, AuthorizationGrant, AuthorizationRequest, OAuthFlow, OAuthInput,
    OAuthMachine, OAuthState, ProviderConfig, RedirectOutcome,
};
pub use pkce::{generate_state, Pkce, CHALLENGE_METHOD};
pub use refresh::{RefreshCoordinator, RefreshOutcome, RefreshPolicy, RefreshReason};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use session::{SessionManager, SessionSnapshot, SessionStateCallback};
pub use token_store::{SecureTokenStore, TokenPair};
pub use transport::{
    BearerTransport, CookieTransport, RestoreOutcome, SessionTransport, SessionUpdate,
};
