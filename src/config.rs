//! Runtime configuration and its validation.

use std::time::Duration;

use clap::ValueEnum;
use tracing::Level;

use crate::filter::ExclusionRules;

/// Default scrape target.
pub const DEFAULT_METRICS_ENDPOINT: &str = "http://0.0.0.0:2112";
/// Default DogStatsD agent address.
pub const DEFAULT_STATSD_ADDRESS: &str = "0.0.0.0:8125";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 60;

/// Log verbosity names accepted on the command line.
///
/// `fatal` and `panic` are accepted for compatibility and map to errors only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogLevel {
    #[default]
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Panic,
}

impl LogLevel {
    pub fn as_tracing_level(&self) -> Level {
        match self {
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error | LogLevel::Fatal | LogLevel::Panic => Level::ERROR,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as ValueEnum>::from_str(s, true)
            .map_err(|_| ConfigError::InvalidLogLevel(s.to_string()))
    }
}

/// Log output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Error type for invalid configuration. Always fatal at startup.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    MissingSourceEndpoint,
    MissingSinkAddress,
    InvalidInterval,
    InvalidLogLevel(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingSourceEndpoint => write!(f, "'metrics-endpoint' is required"),
            ConfigError::MissingSinkAddress => write!(f, "'statsd-address' is required"),
            ConfigError::InvalidInterval => {
                write!(f, "'scraping-interval' must be at least one second")
            }
            ConfigError::InvalidLogLevel(level) => write!(
                f,
                "invalid log level '{}': expected debug, info, warn, error, fatal or panic",
                level
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Validated daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub source_endpoint: String,
    pub sink_address: String,
    pub poll_interval: Duration,
    /// Upper bound on waiting for the drain handshake at shutdown.
    pub shutdown_timeout: Duration,
    pub log_level: LogLevel,
    pub exclusion: ExclusionRules,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_endpoint: DEFAULT_METRICS_ENDPOINT.to_string(),
            sink_address: DEFAULT_STATSD_ADDRESS.to_string(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            log_level: LogLevel::default(),
            exclusion: ExclusionRules::default(),
        }
    }
}

impl Config {
    /// Checks required fields. Called once before anything starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_endpoint.trim().is_empty() {
            return Err(ConfigError::MissingSourceEndpoint);
        }
        if self.sink_address.trim().is_empty() {
            return Err(ConfigError::MissingSinkAddress);
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidInterval);
        }
        Ok(())
    }
}
