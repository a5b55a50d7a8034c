//! Loopback redirect receiver for desktop and CLI sign-in.

use crate::oauth::{AuthorizationAgent, AuthorizationRequest, RedirectOutcome};
use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use auth_config::Provider;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use url::Url;

/// Opens the consent URL (typically in the system browser).
pub type Launcher = Arc<dyn Fn(&Url) -> std::io::Result<()> + Send + Sync>;

/// [`AuthorizationAgent`] that listens on `127.0.0.1:<port>/callback`.
pub struct LoopbackAgent {
    port: u16,
    timeout: Duration,
    launcher: Launcher,
}

impl LoopbackAgent {
    /// The default launcher only logs the URL.
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self {
            port,
            timeout,
            launcher: Arc::new(|url: &Url| {
                info!(url = %url, "Open this URL to continue signing in");
                Ok(())
            }),
        }
    }

    pub fn with_launcher(mut self, launcher: Launcher) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn callback_url(&self) -> String {
        format!("http://127.0.0.1:{}/callback", self.port)
    }
}

#[async_trait]
impl AuthorizationAgent for LoopbackAgent {
    fn redirect_uri(&self, _provider: Provider) -> String {
        self.callback_url()
    }

    async fn authorize(&self, request: &AuthorizationRequest) -> AuthResult<RedirectOutcome> {
        let addr = format!("127.0.0.1:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| AuthError::Network(format!("Failed to bind to {}: {}", addr, e)))?;

        info!(port = self.port, provider = %request.provider, "Redirect receiver listening");

        let (tx, rx) = oneshot::channel::<RedirectOutcome>();
        let tx = Arc::new(tokio::sync::Mutex::new(Some(tx)));

        let server_handle = tokio::spawn({
            let tx = tx.clone();
            async move {
                loop {
                    match listener.accept().await {
                        Ok((mut socket, _)) => {
                            let tx = tx.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(&mut socket, tx).await {
                                    error!("Error handling redirect connection: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                            break;
                        }
                    }
                }
            }
        });

        if let Err(e) = (self.launcher)(&request.url) {
            warn!(error = %e, url = %request.url, "Could not open browser");
        }

        let result = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(AuthError::Network("redirect channel closed".to_string())),
            Err(_) => Err(AuthError::Timeout),
        };

        server_handle.abort();
        result
    }
}

/// Interpret a `/callback?...` request target.
///
/// `access_denied` is how providers report that the user declined, so it is a
/// cancellation rather than an error.
pub fn parse_callback(target: &str) -> Option<RedirectOutcome> {
    let url = Url::parse(&format!("http://127.0.0.1{target}")).ok()?;
    if url.path() != "/callback" {
        return None;
    }
    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

    if let Some(error) = params.get("error") {
        if error == "access_denied" {
            return Some(RedirectOutcome::Cancel);
        }
        return Some(RedirectOutcome::Error {
            error: error.clone(),
            description: params.get("error_description").cloned(),
        });
    }

    Some(RedirectOutcome::Success {
        code: params.get("code").cloned().unwrap_or_default(),
        state: params.get("state").cloned(),
    })
}

async fn handle_connection(
    socket: &mut tokio::net::TcpStream,
    tx: Arc<tokio::sync::Mutex<Option<oneshot::Sender<RedirectOutcome>>>>,
) -> AuthResult<()> {
    let (reader, mut writer) = socket.split();
    let mut reader = BufReader::new(reader);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    // Never log the query: it carries the authorization code.
    debug!(
        request = %request_line.split('?').next().unwrap_or_default().trim(),
        "Received redirect request"
    );

    let Some(rest) = request_line.strip_prefix("GET ") else {
        send_response(&mut writer, 405, "Method Not Allowed", "Method Not Allowed").await?;
        return Ok(());
    };
    let target = rest.split_whitespace().next().unwrap_or_default();

    let Some(outcome) = parse_callback(target) else {
        send_response(&mut writer, 404, "Not Found", "Not Found").await?;
        return Ok(());
    };

    let page = match &outcome {
        RedirectOutcome::Success { code, .. } if !code.is_empty() => success_page(),
        RedirectOutcome::Success { .. } => error_page("Missing authorization code"),
        RedirectOutcome::Cancel => error_page("Sign in was cancelled"),
        RedirectOutcome::Error { error, .. } => error_page(error),
    };
    send_response(&mut writer, 200, "OK", &page).await?;

    if let Some(tx) = tx.lock().await.take() {
        let _ = tx.send(outcome);
    }

    Ok(())
}

async fn send_response(
    writer: &mut tokio::net::tcp::WriteHalf<'_>,
    status_code: u16,
    status_text: &str,
    body: &str,
) -> AuthResult<()> {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status_code,
        status_text,
        body.len(),
        body
    );
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

fn success_page() -> String {
    r#"<!DOCTYPE html>
<html>
<head><title>Signed in</title></head>
<body style="font-family: system-ui; text-align: center; padding: 50px;">
<h1 style="color: #22c55e;">Signed in</h1>
<p>You can close this window and return to the terminal.</p>
<script>setTimeout(() => window.close(), 2000);</script>
</body>
</html>"#
        .to_string()
}

fn error_page(error: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Sign in failed</title></head>
<body style="font-family: system-ui; text-align: center; padding: 50px;">
<h1 style="color: #ef4444;">Sign in failed</h1>
<p>{}</p>
<p style="color: #888;">You can close this window and try again.</p>
</body>
</html>"#,
        escape_html(error)
    )
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
