//! Logging initialization.
//!
//! Thin wrapper over the observability crate: structured JSONL goes to
//! `~/.authsession/logs/session.jsonl`, `RUST_LOG` overrides `level`.

use crate::{CoreResult, Paths};

/// Service name written into every log line.
const SERVICE_NAME: &str = "authsession";

/// Initialize the logging system.
///
/// # Example
///
/// ```ignore
/// let paths = Paths::new()?;
/// init_logging(&paths, "info", false)?;
/// tracing::info!("ready");
/// ```
pub fn init_logging(paths: &Paths, level: &str, also_stderr: bool) -> CoreResult<()> {
    observability::init_with_config(observability::LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: level.into(),
        log_path: Some(paths.log_file()),
        also_stderr,
    })?;
    Ok(())
}
