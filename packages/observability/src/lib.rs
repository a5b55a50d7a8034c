//! # Observability
//!
//! Structured logging for the authsession workspace.
//!
//! Crates are **log producers** only. The binary calls
//! `observability::init_with_config()` once at startup and everything else uses the
//! standard `tracing` macros.
//!
//! Every event is written as one JSON object per line to
//! `~/.authsession/logs/session.jsonl`:
//!
//! - `tail -f ~/.authsession/logs/session.jsonl | jq` for pretty JSON
//! - `lnav ~/.authsession/logs/session.jsonl` for interactive exploration
//!
//! Fields whose name or value looks like a credential (tokens, bearer
//! headers, compact JWTs) are replaced with `[REDACTED]` before they are
//! written.
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() -> std::io::Result<()> {
//!     observability::init_with_config(observability::LogConfig {
//!         service_name: "authsession".into(),
//!         default_level: "debug".into(),
//!         also_stderr: true,
//!         ..Default::default()
//!     })?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

mod json_layer;
mod redact;
mod writer;

use std::io;
use std::path::PathBuf;

pub use redact::{is_sensitive_key, sanitize_value, REDACTED};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Written into every line as `service`.
    pub service_name: String,

    /// Filter directive used when `RUST_LOG` is unset.
    pub default_level: String,

    /// Defaults to `~/.authsession/logs/session.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Mirror events to stderr in compact form.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "authsession".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize logging with custom configuration.
///
/// Fails if the log file cannot be opened or a global subscriber is
/// already installed.
pub fn init_with_config(config: LogConfig) -> io::Result<()> {
    writer::init_file_subscriber(&config)
}
