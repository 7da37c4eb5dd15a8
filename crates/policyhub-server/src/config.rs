//! Configuration loading from file and environment variables.
//!
//! Shared by the `policyhub-server` and `policyhub-migrate` binaries.

use policyhub_db::{Backend, DbSettings};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL: `postgres://…`, `postgresql://…` or `sqlite://<path>`.
    #[serde(default)]
    pub url: Option<String>,

    /// Accept any Postgres server certificate (TLS is still required).
    ///
    /// On by default. Turn off to get `verify-full` certificate checks.
    #[serde(default = "default_accept_invalid_certs")]
    pub accept_invalid_certs: bool,

    /// Maximum pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection.
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "policyhub_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_accept_invalid_certs() -> bool {
    true
}

fn default_max_connections() -> u32 {
    DbSettings::default().max_connections
}

fn default_acquire_timeout_secs() -> u64 {
    DbSettings::default().acquire_timeout_secs
}

fn default_busy_timeout_ms() -> u64 {
    DbSettings::default().busy_timeout_ms
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            accept_invalid_certs: default_accept_invalid_certs(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl DatabaseConfig {
    /// Pool settings derived from this section.
    pub fn settings(&self) -> DbSettings {
        DbSettings {
            max_connections: self.max_connections,
            acquire_timeout_secs: self.acquire_timeout_secs,
            accept_invalid_certs: self.accept_invalid_certs,
            busy_timeout_ms: self.busy_timeout_ms,
        }
    }

    /// The configured URL, if set and not blank.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref().map(str::trim).filter(|url| !url.is_empty())
    }

    /// The backend selected by the URL scheme, or `None` if no URL is set.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnsupportedDatabaseUrl` for unknown schemes.
    pub fn backend(&self) -> Result<Option<Backend>, ConfigError> {
        let Some(url) = self.url() else {
            return Ok(None);
        };
        match Backend::from_url(url) {
            Some(backend) => Ok(Some(backend)),
            // Only the scheme is reported so credentials stay out of logs.
            None => Err(ConfigError::UnsupportedDatabaseUrl(
                url.split(':').next().unwrap_or_default().to_string(),
            )),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The database URL uses a scheme no backend supports.
    #[error("unsupported database url scheme '{0}' (expected postgres:// or sqlite://)")]
    UnsupportedDatabaseUrl(String),
}

/// Picks the config file path: first CLI argument, then
/// `POLICYHUB_CONFIG_PATH`, then `config.toml`. Also returns where it came
/// from, for logging.
pub fn resolve_config_path() -> (String, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (path, "cli-arg");
    }

    if let Ok(path) = std::env::var("POLICYHUB_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (path, "env-var");
        }
    }

    ("config.toml".to_string(), "default")
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies environment overrides (see [`apply_env_overrides`]).
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies environment overrides read through `lookup`:
///
/// - `POLICYHUB_HOST` overrides `server.host`
/// - `PORT`, then `POLICYHUB_PORT`, override `server.port` (the latter wins)
/// - `DATABASE_URL` overrides `database.url`
/// - `POLICYHUB_DB_ACCEPT_INVALID_CERTS` overrides `database.accept_invalid_certs`
/// - `POLICYHUB_DB_MAX_CONNECTIONS` overrides `database.max_connections`
/// - `POLICYHUB_LOG_LEVEL` overrides `logging.level`
/// - `POLICYHUB_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// Values that fail to parse are ignored.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("POLICYHUB_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    for key in ["PORT", "POLICYHUB_PORT"] {
        if let Some(port) = lookup(key) {
            if let Ok(parsed) = port.parse() {
                config.server.port = parsed;
            }
        }
    }
    if let Some(url) = lookup("DATABASE_URL") {
        config.database.url = Some(url);
    }
    if let Some(flag) = lookup("POLICYHUB_DB_ACCEPT_INVALID_CERTS") {
        match flag.as_str() {
            "true" | "1" => config.database.accept_invalid_certs = true,
            "false" | "0" => config.database.accept_invalid_certs = false,
            _ => {}
        }
    }
    if let Some(max) = lookup("POLICYHUB_DB_MAX_CONNECTIONS") {
        if let Ok(parsed) = max.parse() {
            config.database.max_connections = parsed;
        }
    }
    if let Some(level) = lookup("POLICYHUB_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("POLICYHUB_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}
