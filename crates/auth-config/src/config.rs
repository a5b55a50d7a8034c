//! Configuration management for the session core.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Default token broker URL (can be overridden at compile time via AUTHSESSION_BASE_URL).
pub const DEFAULT_BASE_URL: &str = match option_env!("AUTHSESSION_BASE_URL") {
    Some(url) => url,
    None => "http://localhost:8081",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default custom URL scheme used for native redirects.
pub const DEFAULT_APP_SCHEME: &str = "authsession";

/// Client id the broker expects for Google sign-in.
pub const DEFAULT_GOOGLE_CLIENT_ID: &str = "google";

/// Default loopback port for the native redirect receiver.
pub const DEFAULT_CALLBACK_PORT: u16 = 9876;

/// Default time to wait for the provider redirect.
pub const DEFAULT_REDIRECT_TIMEOUT_SECS: u64 = 120;

/// Default timeout for broker requests.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const ENV_PREFIX: &str = "AUTHSESSION_";

/// Returns the broker URL baked in at compile time.
pub fn compile_time_base_url() -> &'static str {
    DEFAULT_BASE_URL
}

/// Runtime the session is hosted in.
///
/// `Web` keeps credentials in HTTP-only cookies managed by the HTTP client.
/// `Native` keeps a token pair in secure storage and sends bearer headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Web,
    #[default]
    Native,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Web => "web",
            Platform::Native => "native",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "web" => Ok(Platform::Web),
            "native" => Ok(Platform::Native),
            other => Err(CoreError::Config(format!("unknown platform: {other}"))),
        }
    }
}

/// Identity provider a user can sign in with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Github,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Github => "github",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(Provider::Google),
            "github" => Ok(Provider::Github),
            other => Err(CoreError::Config(format!("unknown provider: {other}"))),
        }
    }
}

/// Session core configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Token broker base URL; all `/api/auth/*` endpoints hang off it.
    pub base_url: String,
    /// Runtime platform.
    pub platform: Platform,
    /// Custom scheme for native redirects (`<scheme>://`).
    pub app_scheme: String,
    /// Google client id as registered with the broker.
    pub google_client_id: Option<String>,
    /// GitHub OAuth app client id.
    pub github_client_id: Option<String>,
    /// Secure storage name of the access token.
    pub access_token_key: String,
    /// Secure storage name of the refresh token.
    pub refresh_token_key: String,
    /// Timeout applied to every broker request.
    pub request_timeout_secs: u64,
    /// Tokens expiring within this many seconds count as expired.
    pub expiry_skew_secs: u64,
    /// Loopback port the native redirect receiver listens on.
    pub callback_port: u16,
    /// How long to wait for the provider redirect.
    pub redirect_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            platform: Platform::default(),
            app_scheme: DEFAULT_APP_SCHEME.to_string(),
            google_client_id: Some(DEFAULT_GOOGLE_CLIENT_ID.to_string()),
            github_client_id: None,
            access_token_key: "accessToken".to_string(),
            refresh_token_key: "refreshToken".to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            expiry_skew_secs: 0,
            callback_port: DEFAULT_CALLBACK_PORT,
            redirect_timeout_secs: DEFAULT_REDIRECT_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> CoreResult<Self> {
        let mut config = Self::default();
        config.load_from_env()?;
        Ok(config)
    }

    /// Load configuration from the config file if present, then apply
    /// environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) -> CoreResult<()> {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Apply `AUTHSESSION_*` overrides read through `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> CoreResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            lookup(&format!("{ENV_PREFIX}{suffix}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(level) = var("LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(url) = var("BASE_URL") {
            self.base_url = url;
        }
        if let Some(platform) = var("PLATFORM") {
            self.platform = platform.parse()?;
        }
        if let Some(scheme) = var("APP_SCHEME") {
            self.app_scheme = scheme;
        }
        if let Some(id) = var("GOOGLE_CLIENT_ID") {
            self.google_client_id = Some(id);
        }
        if let Some(id) = var("GITHUB_CLIENT_ID") {
            self.github_client_id = Some(id);
        }
        Ok(())
    }

    /// Check values that would otherwise fail later at request time.
    pub fn validate(&self) -> CoreResult<()> {
        self.base_url()?;
        if self.app_scheme.is_empty() {
            return Err(CoreError::Config("app_scheme must not be empty".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(CoreError::Config(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.access_token_key == self.refresh_token_key {
            return Err(CoreError::Config(
                "access and refresh tokens must use different storage keys".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the broker base URL as a parsed URL.
    pub fn base_url(&self) -> CoreResult<Url> {
        Url::parse(&self.base_url).map_err(CoreError::from)
    }

    /// Resolve a broker path such as `/api/auth/token`.
    pub fn endpoint(&self, path: &str) -> CoreResult<Url> {
        Ok(self.base_url()?.join(path)?)
    }

    /// Client id for `provider`; missing ids are a startup configuration error.
    pub fn client_id(&self, provider: Provider) -> CoreResult<&str> {
        let id = match provider {
            Provider::Google => self.google_client_id.as_deref(),
            Provider::Github => self.github_client_id.as_deref(),
        };
        id.filter(|id| !id.is_empty()).ok_or_else(|| {
            CoreError::Config(format!("missing client id for provider {provider}"))
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn redirect_timeout(&self) -> Duration {
        Duration::from_secs(self.redirect_timeout_secs)
    }
}
