//! Authentication commands.

use crate::output::{self, OutputFormat};
use anyhow::{bail, Result};
use auth_config::Provider;
use auth_session::{
    AuthenticatedUser, LoopbackAgent, RefreshReason, SessionManager, SessionState,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use url::Url;

/// Sign in through the browser and the loopback redirect receiver.
pub async fn login(session: &SessionManager, provider: Provider, format: &OutputFormat) -> Result<()> {
    if session.restore().await == SessionState::SignedIn {
        if let Some(user) = session.user() {
            output::print_success(&format!("Already signed in as {}", display_name(&user)), format);
            return Ok(());
        }
    }

    let config = session.config();
    let agent = LoopbackAgent::new(config.callback_port, config.redirect_timeout()).with_launcher(
        Arc::new(|url: &Url| {
            eprintln!("Opening browser to sign in...");
            eprintln!("If it does not open, visit:\n  {}", url);
            open::that(url.as_str())
        }),
    );

    let user = session.sign_in(provider, &agent).await?;
    info!(provider = %provider, "Signed in from CLI");
    output::print_success(&format!("Signed in as {}", display_name(&user)), format);
    Ok(())
}

/// Show the restored session.
pub async fn status(session: &SessionManager, format: &OutputFormat) -> Result<()> {
    session.restore().await;
    let snapshot = session.snapshot();

    match format {
        OutputFormat::Json => output::print_json(&snapshot),
        OutputFormat::Text => {
            output::print_row("State", &snapshot.state.to_string());
            output::print_row("Platform", &snapshot.platform.to_string());
            if let Some(user) = &snapshot.user {
                output::print_row("User", &display_name(user));
                output::print_row("Subject", &user.sub);
                if let Some(exp) = user.cookie_expiration.or(user.exp) {
                    output::print_row("Expires", &format_timestamp(exp));
                }
            }
            if let Some(provider) = snapshot.provider {
                output::print_row("Provider", provider.as_str());
            }
            if let Some(error) = &snapshot.last_error {
                output::print_row("Last error", &error.message);
            }
        }
    }
    Ok(())
}

/// Force a refresh of the current session.
pub async fn refresh(session: &SessionManager, format: &OutputFormat) -> Result<()> {
    if session.restore().await != SessionState::SignedIn {
        bail!("Not signed in. Run 'authsession login' first");
    }

    let outcome = session.refresh_outcome(RefreshReason::Proactive, None).await;
    if !outcome.succeeded() {
        let reason = session
            .last_error()
            .map(|e| e.message)
            .unwrap_or_else(|| "refresh did not complete".to_string());
        bail!("Refresh failed: {}", reason);
    }

    let expires = session
        .user()
        .and_then(|u| u.cookie_expiration.or(u.exp))
        .map(format_timestamp);
    match format {
        OutputFormat::Json => output::print_json(&json!({
            "status": "success",
            "state": session.state(),
            "expires": expires,
        })),
        OutputFormat::Text => match expires {
            Some(expires) => println!("Session refreshed, valid until {}", expires),
            None => println!("Session refreshed"),
        },
    }
    Ok(())
}

/// Sign out and clear stored credentials.
pub async fn logout(session: &SessionManager, format: &OutputFormat) -> Result<()> {
    session.sign_out().await;
    output::print_success("Signed out", format);
    Ok(())
}

fn display_name(user: &AuthenticatedUser) -> String {
    user.email
        .clone()
        .or_else(|| user.name.clone())
        .unwrap_or_else(|| user.sub.clone())
}

fn format_timestamp(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| secs.to_string())
}
