//! JSONL file sink and subscriber installation.

use crate::json_layer::JsonLayer;
use crate::LogConfig;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

fn default_log_path() -> io::Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".authsession/logs/session.jsonl"))
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "home directory not found"))
}

/// Shared append handle on the log file.
///
/// Every clone writes through the same descriptor. Lines are written with a
/// single `write_all` under the lock, so concurrent events never interleave.
#[derive(Clone)]
pub struct LogFileWriter {
    file: Arc<Mutex<File>>,
}

impl LogFileWriter {
    pub fn new(path: &Path) -> io::Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }
}

impl Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.lock().write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.lock().flush()
    }
}

/// Hands out clones of one [`LogFileWriter`].
#[derive(Clone)]
pub struct WriterFactory(LogFileWriter);

impl WriterFactory {
    pub fn new(writer: LogFileWriter) -> Self {
        Self(writer)
    }
}

impl<'a> MakeWriter<'a> for WriterFactory {
    type Writer = LogFileWriter;

    fn make_writer(&'a self) -> LogFileWriter {
        self.0.clone()
    }
}

/// `RUST_LOG` wins over the configured default.
fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global subscriber: JSONL file layer, plus compact stderr
/// output when asked for.
pub fn init_file_subscriber(config: &LogConfig) -> io::Result<()> {
    let log_path = match &config.log_path {
        Some(path) => path.clone(),
        None => default_log_path()?,
    };
    let writer = LogFileWriter::new(&log_path)?;

    let file_layer = JsonLayer::new(config.service_name.clone(), WriterFactory::new(writer))
        .with_filter(env_filter(&config.default_level));
    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .compact()
            .without_time()
            .with_writer(io::stderr)
            .with_filter(env_filter(&config.default_level))
    });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e.to_string()))?;

    tracing::debug!(path = %log_path.display(), service = %config.service_name, "Logging ready");
    Ok(())
}
