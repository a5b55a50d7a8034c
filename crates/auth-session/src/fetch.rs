//! Authenticated requests with one retry after a 401.

use crate::http::{HttpRequest, HttpResponse};
use crate::refresh::{RefreshOutcome, RefreshReason};
use crate::session::SessionManager;
use crate::AuthResult;
use auth_config::Platform;
use tracing::{debug, info, warn};

impl SessionManager {
    /// Send `request` with the session's credentials.
    ///
    /// A 401 triggers a reactive refresh. The request is replayed exactly
    /// once, and only when the refresh produced a new token (native) or the
    /// broker confirmed a live session (web); otherwise the original 401 is
    /// returned unchanged.
    pub async fn fetch_with_auth(&self, request: HttpRequest) -> AuthResult<HttpResponse> {
        let response = self.send_authorized(request.clone()).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        info!(url = %request.url, "Request unauthorized, refreshing session");
        let outcome = self
            .refresh_outcome(RefreshReason::Reactive401, None)
            .await;

        let replay = match (self.transport.platform(), &outcome) {
            (Platform::Native, RefreshOutcome::Refreshed { access_token }) => {
                access_token.is_some()
            }
            (Platform::Web, RefreshOutcome::Refreshed { .. }) => self.user().is_some(),
            _ => false,
        };
        if !replay {
            debug!(refreshed = outcome.succeeded(), "Not replaying request");
            return Ok(response);
        }

        self.send_authorized(request).await
    }

    async fn send_authorized(&self, request: HttpRequest) -> AuthResult<HttpResponse> {
        // Credentials are attached at send time so a replay picks up refreshed tokens.
        let request = self.transport.authorize_request(request);
        match self.http.send(request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(error = %e, "Authenticated request failed");
                self.record_error(&e);
                Err(e)
            }
        }
    }
}
