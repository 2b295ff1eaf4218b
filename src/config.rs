//! Configuration for the framecast server.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::runtime::{FrameCodec, DEFAULT_MAX_FRAME};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "framecast")]
#[command(version = "0.1.0")]
#[command(about = "A non-blocking framed-echo TCP server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:1234)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Framing strategy for client streams
    #[arg(short = 'f', long, value_enum)]
    pub framing: Option<FramingType>,

    /// Maximum frame payload size in bytes
    #[arg(long)]
    pub max_frame: Option<usize>,

    /// Maximum queued outbound bytes per connection before it is closed
    #[arg(long)]
    pub max_pending: Option<usize>,

    /// Maximum number of simultaneous connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Idle timeout in seconds (0 = connections may idle forever)
    #[arg(long)]
    pub idle_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// How a client byte stream is split into messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FramingType {
    /// u32 little-endian length prefix followed by the payload.
    Length,
    /// Newline-delimited payloads.
    Line,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub framing: FramingConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum simultaneous connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
        }
    }
}

/// Framing configuration
#[derive(Debug, Deserialize)]
pub struct FramingConfig {
    #[serde(default = "default_framing")]
    pub mode: FramingType,
    /// Maximum frame payload size in bytes
    #[serde(default = "default_max_frame")]
    pub max_frame: usize,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            mode: default_framing(),
            max_frame: default_max_frame(),
        }
    }
}

/// Resource limits
#[derive(Debug, Deserialize)]
pub struct LimitsConfig {
    /// Maximum queued outbound bytes per connection
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
    /// Idle timeout in seconds, 0 to disable
    #[serde(default)]
    pub idle_timeout: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_pending: default_max_pending(),
            idle_timeout: 0,
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

fn default_listen() -> String {
    "0.0.0.0:1234".to_string()
}

fn default_max_connections() -> usize {
    10_240
}

fn default_framing() -> FramingType {
    FramingType::Length
}

fn default_max_frame() -> usize {
    DEFAULT_MAX_FRAME // 32 MiB
}

fn default_max_pending() -> usize {
    64 * 1024 * 1024 // 64 MiB
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub framing: FramingType,
    pub max_frame: usize,
    pub max_pending: usize,
    pub max_connections: usize,
    /// Seconds of allowed inactivity; 0 matches the reference behavior of
    /// never expiring an idle connection.
    pub idle_timeout: u64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            framing: default_framing(),
            max_frame: default_max_frame(),
            max_pending: default_max_pending(),
            max_connections: default_max_connections(),
            idle_timeout: 0,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            framing: cli.framing.unwrap_or(toml_config.framing.mode),
            max_frame: cli.max_frame.unwrap_or(toml_config.framing.max_frame),
            max_pending: cli.max_pending.unwrap_or(toml_config.limits.max_pending),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            idle_timeout: cli.idle_timeout.unwrap_or(toml_config.limits.idle_timeout),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }

    /// Codec matching the configured framing strategy.
    pub fn codec(&self) -> FrameCodec {
        match self.framing {
            FramingType::Length => FrameCodec::length_prefixed(self.max_frame),
            FramingType::Line => FrameCodec::line_delimited(self.max_frame),
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen, "0.0.0.0:1234");
        assert_eq!(config.framing, FramingType::Length);
        assert_eq!(config.max_frame, 32 << 20);
        assert_eq!(config.idle_timeout, 0);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "127.0.0.1:9000"
            max_connections = 64

            [framing]
            mode = "line"
            max_frame = 8192

            [limits]
            max_pending = 1048576
            idle_timeout = 30

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert_eq!(config.server.max_connections, 64);
        assert_eq!(config.framing.mode, FramingType::Line);
        assert_eq!(config.framing.max_frame, 8192);
        assert_eq!(config.limits.max_pending, 1048576);
        assert_eq!(config.limits.idle_timeout, 30);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_toml_defaults() {
        let config: TomlConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:1234");
        assert_eq!(config.framing.max_frame, 32 << 20);
        assert_eq!(config.limits.idle_timeout, 0);
    }
}
