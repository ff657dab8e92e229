//! Server configuration loading from file and environment variables.

use crate::relay::{RelaySettings, DEFAULT_SHUTDOWN_GRACE};
use dishcovery_types::GeoPoint;
use dishcovery_upstream::GeminiConfig;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Voice relay settings.
    #[serde(default)]
    pub voice: VoiceConfig,

    /// Speech and chat service settings.
    #[serde(default)]
    pub gemini: GeminiConfig,
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

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "dishcovery_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceConfig {
    /// Serve calls from the scripted mock instead of the live service.
    #[serde(default)]
    pub mock: bool,

    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Location used when a caller omits `lat`/`lng`.
    #[serde(default = "default_lat")]
    pub default_lat: f64,

    #[serde(default = "default_lng")]
    pub default_lng: f64,
}

impl VoiceConfig {
    /// A zero idle timeout falls back to the default.
    pub fn relay_settings(&self) -> RelaySettings {
        let idle_secs = match self.idle_timeout_secs {
            0 => default_idle_timeout_secs(),
            secs => secs,
        };
        RelaySettings {
            idle_timeout: Duration::from_secs(idle_secs),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn default_location(&self) -> GeoPoint {
        GeoPoint::new(self.default_lat, self.default_lng)
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_idle_timeout_secs() -> u64 {
    60
}

fn default_lat() -> f64 {
    GeoPoint::CAMPUS.latitude
}

fn default_lng() -> f64 {
    GeoPoint::CAMPUS.longitude
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
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

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            mock: false,
            idle_timeout_secs: default_idle_timeout_secs(),
            default_lat: default_lat(),
            default_lng: default_lng(),
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
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies environment overrides (see [`apply_env_overrides`]).
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let config = match path {
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

    Ok(apply_env_overrides(config, |key| std::env::var(key).ok()))
}

/// Environment variable overrides:
/// - `DISHCOVERY_HOST` overrides `server.host`
/// - `DISHCOVERY_PORT` overrides `server.port`
/// - `DISHCOVERY_LOG_LEVEL` overrides `logging.level`
/// - `DISHCOVERY_LOG_JSON` overrides `logging.json` ("true" or "1" to enable)
/// - `DISHCOVERY_MOCK_MODE`, or `MOCK_MODE`, overrides `voice.mock`
/// - `DISHCOVERY_IDLE_TIMEOUT_SECS` overrides `voice.idle_timeout_secs`
/// - `GEMINI_API_KEY` overrides `gemini.api_key`
///
/// Unparsable values, and a zero idle timeout, are ignored.
pub fn apply_env_overrides(mut config: Config, lookup: impl Fn(&str) -> Option<String>) -> Config {
    if let Some(host) = lookup("DISHCOVERY_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = lookup("DISHCOVERY_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(level) = lookup("DISHCOVERY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("DISHCOVERY_LOG_JSON") {
        config.logging.json = is_truthy(&json);
    }
    if let Some(mock) = lookup("DISHCOVERY_MOCK_MODE").or_else(|| lookup("MOCK_MODE")) {
        config.voice.mock = is_truthy(&mock);
    }
    if let Some(secs) = lookup("DISHCOVERY_IDLE_TIMEOUT_SECS") {
        match secs.parse::<u64>() {
            Ok(parsed) if parsed > 0 => config.voice.idle_timeout_secs = parsed,
            _ => {}
        }
    }
    if let Some(key) = lookup("GEMINI_API_KEY") {
        config.gemini.api_key = key;
    }

    config
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim(), "true" | "1" | "yes")
}
