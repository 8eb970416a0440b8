//! Configuration module for the filebeam server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::connection::TimeoutPolicy;

/// Command-line arguments for the file server
#[derive(Parser, Debug, Default)]
#[command(name = "filebeam")]
#[command(author = "filebeam authors")]
#[command(version = "0.1.0")]
#[command(about = "A keep-alive file transfer server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to (e.g., localhost or 0.0.0.0)
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory that request paths are resolved against
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Number of runtime worker threads (defaults to number of CPU cores)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Listen backlog passed to the OS
    #[arg(long)]
    pub backlog: Option<u32>,

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
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Number of worker threads
    pub workers: Option<usize>,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            root: default_root(),
            workers: None,
            backlog: default_backlog(),
        }
    }
}

/// Adaptive read timeout tiers
#[derive(Debug, Deserialize)]
pub struct TimeoutConfig {
    /// Timeout while the server is lightly loaded
    #[serde(default = "default_relaxed_secs")]
    pub relaxed_secs: u64,
    #[serde(default = "default_moderate_secs")]
    pub moderate_secs: u64,
    /// Timeout once `strict_threshold` connections are active
    #[serde(default = "default_strict_secs")]
    pub strict_secs: u64,
    #[serde(default = "default_moderate_threshold")]
    pub moderate_threshold: usize,
    #[serde(default = "default_strict_threshold")]
    pub strict_threshold: usize,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            relaxed_secs: default_relaxed_secs(),
            moderate_secs: default_moderate_secs(),
            strict_secs: default_strict_secs(),
            moderate_threshold: default_moderate_threshold(),
            strict_threshold: default_strict_threshold(),
        }
    }
}

impl TimeoutConfig {
    fn policy(&self) -> TimeoutPolicy {
        TimeoutPolicy {
            relaxed: Duration::from_secs(self.relaxed_secs),
            moderate: Duration::from_secs(self.moderate_secs),
            strict: Duration::from_secs(self.strict_secs),
            moderate_threshold: self.moderate_threshold,
            strict_threshold: self.strict_threshold,
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
    "localhost".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_backlog() -> u32 {
    128
}

fn default_relaxed_secs() -> u64 {
    20
}

fn default_moderate_secs() -> u64 {
    10
}

fn default_strict_secs() -> u64 {
    5
}

fn default_moderate_threshold() -> usize {
    5
}

fn default_strict_threshold() -> usize {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub root: PathBuf,
    pub workers: Option<usize>,
    pub backlog: u32,
    pub timeouts: TimeoutPolicy,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config::merge(CliArgs::default(), TomlConfig::default())
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

        Ok(Config::merge(cli, toml_config))
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            root: cli.root.unwrap_or(toml_config.server.root),
            workers: cli.workers.or(toml_config.server.workers),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            timeouts: toml_config.timeouts.policy(),
            // clap's default is "info", so only an explicit non-default wins
            log_level: if !cli.log_level.is_empty() && cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    /// `host:port` form used for address resolution and logging
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidAddress(String),
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
            ConfigError::InvalidAddress(addr) => {
                write!(f, "Address '{}' did not resolve to any socket address", addr)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
