use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Default backend API base URL used when `API_BASE_URL` is not set.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";

/// Default directory holding the durable token store.
pub const DEFAULT_STORE_PATH: &str = ".records-client";

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Base URL of the records backend API. Every authenticated call, as well as
    /// the login, logout and refresh endpoints, is resolved against it.
    #[arg(long, env, default_value = DEFAULT_API_BASE_URL)]
    api_base_url: String,

    /// The origin that credential messages from the login popup must carry.
    /// Defaults to the origin of the API base URL.
    #[arg(long, env)]
    trusted_origin: Option<String>,

    /// Directory of the durable key-value store that keeps the token pair
    /// across restarts.
    #[arg(long, env, default_value = DEFAULT_STORE_PATH)]
    store_path: PathBuf,

    /// Seconds before access token expiry at which a proactive refresh fires.
    #[arg(long, env, default_value_t = 60)]
    pub refresh_lead_time_secs: u64,

    /// Upper bound in seconds on the best-effort logout notification.
    #[arg(long, env, default_value_t = 5)]
    pub logout_timeout_secs: u64,

    /// Timeout in seconds applied to every HTTP request.
    #[arg(long, env, default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Transport-level retries for connection errors and 5xx responses.
    #[arg(long, env, default_value_t = 2)]
    pub max_transient_retries: u32,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,
}

/// Raised when the configured URLs cannot be interpreted.
#[derive(Debug, PartialEq)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Invalid configuration: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        Self::load_env_file();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    /// Loads `.env` into the process environment, for parsers that flatten `Config`.
    pub fn load_env_file() {
        dotenv().ok();
    }

    pub fn set_api_base_url(mut self, api_base_url: String) -> Self {
        self.api_base_url = api_base_url;
        self
    }

    pub fn set_store_path(mut self, store_path: PathBuf) -> Self {
        self.store_path = store_path;
        self
    }

    pub fn api_base_url(&self) -> &str {
        self.api_base_url.trim_end_matches('/')
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Returns the origin credential messages are accepted from.
    ///
    /// An explicit `trusted_origin` wins; otherwise the origin of the API base
    /// URL is used, serialized as `scheme://host[:port]`.
    pub fn trusted_origin(&self) -> Result<String, ConfigError> {
        if let Some(origin) = &self.trusted_origin {
            return Ok(origin.trim_end_matches('/').to_string());
        }
        origin_of(&self.api_base_url)
    }

    pub fn refresh_lead_time(&self) -> Duration {
        Duration::from_secs(self.refresh_lead_time_secs)
    }

    pub fn logout_timeout(&self) -> Duration {
        Duration::from_secs(self.logout_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Serializes the origin of `url`, rejecting URLs without a tuple origin.
pub fn origin_of(url: &str) -> Result<String, ConfigError> {
    let parsed = Url::parse(url).map_err(|e| ConfigError(format!("{url}: {e}")))?;
    let origin = parsed.origin();
    if !origin.is_tuple() {
        return Err(ConfigError(format!("{url} has no usable origin")));
    }
    Ok(origin.ascii_serialization())
}
