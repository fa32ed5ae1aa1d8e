//! Configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;
use tollgate_rpc::{AgentAddress, DEFAULT_TIMEOUT};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Decision agent settings.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Body capture and anomaly thresholds.
    #[serde(default)]
    pub limits: LimitsConfig,

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

    /// Reported server name when a request has no `Host` header.
    #[serde(default = "default_server_name")]
    pub server_name: String,
}

/// How to reach the decision agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Socket path, or `["host", port]` for TCP.
    #[serde(default)]
    pub address: AgentAddress,

    /// Connect/send/receive timeout in milliseconds. `0` means the default.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Access key sent with every pre-request snapshot.
    #[serde(default)]
    pub access_key_id: String,
}

/// Body capture and anomaly detection limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Largest request body forwarded to the agent, in bytes.
    #[serde(default = "default_max_post_body")]
    pub max_post_body: usize,

    /// Responses larger than this are reported as anomalous.
    #[serde(default = "default_max_response_size")]
    pub max_response_size: u64,

    /// Responses slower than this are reported as anomalous.
    #[serde(default = "default_max_response_millis")]
    pub max_response_millis: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "tollgate_rpc=debug,info").
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

fn default_server_name() -> String {
    "localhost".to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}

fn default_max_post_body() -> usize {
    100_000
}

fn default_max_response_size() -> u64 {
    524_288
}

fn default_max_response_millis() -> u64 {
    1_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            server_name: default_server_name(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: AgentAddress::default(),
            timeout_ms: default_timeout_ms(),
            access_key_id: String::new(),
        }
    }
}

impl AgentConfig {
    /// Socket timeout; zero is coerced to the default.
    pub fn timeout(&self) -> Duration {
        match self.timeout_ms {
            0 => DEFAULT_TIMEOUT,
            ms => Duration::from_millis(ms),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_post_body: default_max_post_body(),
            max_response_size: default_max_response_size(),
            max_response_millis: default_max_response_millis(),
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

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `TOLLGATE_HOST` overrides `server.host`
/// - `TOLLGATE_PORT` overrides `server.port`
/// - `TOLLGATE_SERVER_NAME` overrides `server.server_name`
/// - `TOLLGATE_AGENT_ADDRESS` overrides `agent.address` (`host:port` or a socket path)
/// - `TOLLGATE_AGENT_TIMEOUT_MS` overrides `agent.timeout_ms`
/// - `TOLLGATE_LOG_LEVEL` overrides `logging.level`
/// - `TOLLGATE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
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

/// Applies `TOLLGATE_*` overrides read through `lookup`.
///
/// Values that fail to parse are ignored.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(host) = lookup("TOLLGATE_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = lookup("TOLLGATE_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(name) = lookup("TOLLGATE_SERVER_NAME") {
        config.server.server_name = name;
    }
    if let Some(address) = lookup("TOLLGATE_AGENT_ADDRESS") {
        if let Ok(parsed) = address.parse() {
            config.agent.address = parsed;
        }
    }
    if let Some(timeout) = lookup("TOLLGATE_AGENT_TIMEOUT_MS") {
        if let Ok(parsed) = timeout.parse() {
            config.agent.timeout_ms = parsed;
        }
    }
    if let Some(level) = lookup("TOLLGATE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("TOLLGATE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}
