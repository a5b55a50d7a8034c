//! Authenticated fetch command.

use crate::output::{self, OutputFormat};
use anyhow::{Context, Result};
use auth_session::{HttpRequest, Method, SessionManager};
use serde_json::{json, Value};
use url::Url;

/// Send a request with the session's credentials and print the response.
pub async fn fetch(
    session: &SessionManager,
    url: &str,
    method: &str,
    data: Option<&str>,
    format: &OutputFormat,
) -> Result<()> {
    let url = Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
    let method: Method = method.parse()?;

    session.restore().await;
    session.ensure_fresh().await;

    let response = session.fetch_with_auth(build_request(method, url, data)).await?;

    match format {
        OutputFormat::Json => {
            let body = response.json::<Value>().unwrap_or_else(|_| json!(response.text()));
            output::print_json(&json!({ "status": response.status, "body": body }));
        }
        OutputFormat::Text => {
            if !response.is_success() {
                eprintln!("HTTP {}", response.status);
            }
            println!("{}", response.text());
        }
    }

    if response.is_unauthorized() {
        anyhow::bail!("Request was not authorized. Run 'authsession login' to sign in");
    }
    Ok(())
}

fn build_request(method: Method, url: Url, data: Option<&str>) -> HttpRequest {
    let request = HttpRequest::new(method, url);
    match data {
        Some(body) => match serde_json::from_str::<Value>(body) {
            Ok(value) => request.json(value),
            Err(_) => request.text(body),
        },
        None => request,
    }
}
