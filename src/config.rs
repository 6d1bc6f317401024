//! Configuration module for the ws-echo server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "ws-echo")]
#[command(author = "ws-echo authors")]
#[command(version = "0.1.0")]
#[command(about = "A single-threaded WebSocket echo server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Interface to bind to (e.g., 0.0.0.0)
    #[arg(short = 'l', long)]
    pub host: Option<String>,

    /// TCP port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Listen backlog depth
    #[arg(short, long)]
    pub backlog: Option<i32>,

    /// Maximum number of concurrent connections
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and event loop configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Listen backlog depth
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Maximum concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Readiness events handled per poll
    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backlog: default_backlog(),
            max_connections: default_max_connections(),
            events_capacity: default_events_capacity(),
        }
    }
}

/// Per-connection buffer limits
#[derive(Debug, Deserialize)]
pub struct LimitsConfig {
    /// Bytes read from a socket per read call
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Largest accepted HTTP request head
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,
    /// Largest accepted WebSocket frame payload
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Largest amount of unsent output per connection
    #[serde(default = "default_max_outbound_size")]
    pub max_outbound_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: default_read_buffer_size(),
            max_request_size: default_max_request_size(),
            max_frame_size: default_max_frame_size(),
            max_outbound_size: default_max_outbound_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4567
}

fn default_backlog() -> i32 {
    10
}

fn default_max_connections() -> usize {
    1024
}

fn default_events_capacity() -> usize {
    1024
}

fn default_read_buffer_size() -> usize {
    1024
}

fn default_max_request_size() -> usize {
    8 * 1024
}

fn default_max_frame_size() -> usize {
    1024 * 1024 // 1 MB
}

fn default_max_outbound_size() -> usize {
    4 * 1024 * 1024 // 4 MB
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Per-connection limits handed to the protocol layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub read_buffer_size: usize,
    pub max_request_size: usize,
    pub max_frame_size: usize,
    pub max_outbound_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        LimitsConfig::default().into()
    }
}

/// Largest frame header: 2 bytes, 8 bytes of extended length, 4 bytes of mask.
const MAX_FRAME_HEADER: usize = 14;

impl Limits {
    /// Queued output above which a connection stops reading.
    ///
    /// One read can complete at most a buffered frame plus one chunk, so
    /// pausing here leaves room for that output below `max_outbound_size`.
    pub fn outbound_high_water(&self) -> usize {
        let burst = self
            .max_frame_size
            .saturating_add(MAX_FRAME_HEADER)
            .saturating_add(self.read_buffer_size);
        self.max_outbound_size.saturating_sub(burst)
    }
}

impl From<LimitsConfig> for Limits {
    fn from(limits: LimitsConfig) -> Self {
        Self {
            read_buffer_size: limits.read_buffer_size.max(1),
            max_request_size: limits.max_request_size,
            max_frame_size: limits.max_frame_size,
            max_outbound_size: limits.max_outbound_size,
        }
    }
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub backlog: i32,
    pub max_connections: usize,
    pub events_capacity: usize,
    pub limits: Limits,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            events_capacity: toml_config.server.events_capacity.max(1),
            limits: toml_config.limits.into(),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    /// `host:port` as given in the configuration.
    pub fn listen_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 4567);
        assert_eq!(config.server.backlog, 10);
        assert_eq!(config.limits.read_buffer_size, 1024);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "127.0.0.1"
            port = 9001
            backlog = 128

            [limits]
            max_frame_size = 65536

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.server.backlog, 128);
        assert_eq!(config.server.max_connections, 1024);
        assert_eq!(config.limits.max_frame_size, 65536);
        assert_eq!(config.limits.max_request_size, 8192);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let cli = CliArgs::parse_from(["ws-echo", "--port", "7000", "--log-level", "trace"]);
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            host = "127.0.0.1"
            port = 9001
            "#,
        )
        .unwrap();

        let config = Config::merge(cli, toml_config);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 7000);
        assert_eq!(config.backlog, 10);
        assert_eq!(config.log_level, "trace");
        assert_eq!(config.limits, Limits::default());
        assert_eq!(config.listen_address(), "127.0.0.1:7000");
    }

    #[test]
    fn test_ipv6_listen_address() {
        let cli = CliArgs::parse_from(["ws-echo", "--host", "::1"]);
        let config = Config::merge(cli, TomlConfig::default());
        assert_eq!(config.listen_address(), "[::1]:4567");
    }

    #[test]
    fn test_outbound_high_water() {
        let limits = Limits::default();
        assert_eq!(
            limits.outbound_high_water(),
            4 * 1024 * 1024 - (1024 * 1024 + 14 + 1024)
        );

        let tight = Limits {
            max_outbound_size: 1024,
            ..Limits::default()
        };
        assert_eq!(tight.outbound_high_water(), 0);
    }
}
