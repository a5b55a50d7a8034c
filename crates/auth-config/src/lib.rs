//! Configuration, filesystem layout and logging setup for authsession.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    compile_time_base_url, Config, Platform, Provider, DEFAULT_BASE_URL, DEFAULT_LOG_LEVEL,
};
pub use error::{CoreError, CoreResult};
pub use logging::init_logging;
pub use paths::Paths;
