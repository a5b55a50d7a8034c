//! Authorization-code exchange against the token broker.

use crate::http::{HttpClient, HttpRequest, HttpResponse};
use crate::oauth::AuthorizationGrant;
use crate::token_store::TokenPair;
use crate::{AuthError, AuthResult};
use auth_config::Platform;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

/// What the broker handed back for a redeemed code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeResponse {
    /// Web: the session lives in HTTP-only cookies set on the response.
    Cookie {
        issued_at: Option<i64>,
        expires_at: Option<i64>,
    },
    /// Native: tokens in the body, to be persisted by the caller.
    Tokens(TokenPair),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CookieExchangeBody {
    #[serde(default)]
    success: bool,
    issued_at: Option<i64>,
    expires_at: Option<i64>,
}

/// Redeems authorization codes. Never retries: a code is single-use.
pub struct TokenExchangeClient {
    http: Arc<dyn HttpClient>,
    platform: Platform,
}

impl TokenExchangeClient {
    pub fn new(http: Arc<dyn HttpClient>, platform: Platform) -> Self {
        Self { http, platform }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub async fn exchange(&self, grant: &AuthorizationGrant) -> AuthResult<ExchangeResponse> {
        if grant.code.is_empty() {
            return Err(AuthError::MissingAuthorizationCode);
        }

        let mut fields = vec![
            ("code", grant.code.as_str()),
            ("code_verifier", grant.code_verifier.as_str()),
        ];
        if self.platform == Platform::Web {
            fields.push(("platform", "web"));
        }

        let request = HttpRequest::post(grant.token_endpoint.clone()).form(fields);
        let response = self.http.send(request).await?;

        if !response.is_success() {
            return Err(exchange_error(&response));
        }

        match self.platform {
            Platform::Web => {
                let body: CookieExchangeBody = response
                    .json()
                    .map_err(|e| AuthError::Exchange(format!("unexpected response: {e}")))?;
                if !body.success {
                    return Err(AuthError::Exchange(
                        "broker did not confirm the session".to_string(),
                    ));
                }
                info!(provider = %grant.provider, "Session cookie issued");
                Ok(ExchangeResponse::Cookie {
                    issued_at: body.issued_at,
                    expires_at: body.expires_at,
                })
            }
            Platform::Native => {
                let pair: TokenPair = response
                    .json()
                    .map_err(|e| AuthError::Exchange(format!("unexpected response: {e}")))?;
                if pair.access_token.is_empty() {
                    return Err(AuthError::Exchange("empty access token".to_string()));
                }
                info!(provider = %grant.provider, "Tokens issued");
                Ok(ExchangeResponse::Tokens(pair))
            }
        }
    }
}

/// 4xx is the broker (or provider behind it) rejecting the code; 5xx is the
/// broker being unavailable.
fn exchange_error(response: &HttpResponse) -> AuthError {
    let message = response
        .error_message()
        .unwrap_or_else(|| format!("status {}", response.status));
    warn!(status = response.status, error = %message, "Token exchange rejected");
    if response.status >= 500 {
        AuthError::Network(message)
    } else {
        AuthError::Exchange(message)
    }
}
