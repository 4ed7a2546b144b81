//! Configuration structures for LineLog

use crate::{LineLogError, Result};
use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix, e.g. `LINELOG_SERVER__PORT=9100`
pub const ENV_PREFIX: &str = "LINELOG";

/// Server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listening socket settings
    pub server: ServerSettings,
    /// Per-connection worker settings
    pub connection: ConnectionSettings,
    /// Persisted log settings
    pub storage: StorageSettings,
    /// Timestamp ticker settings
    pub ticker: TickerSettings,
    /// Diagnostic output settings
    pub logging: LoggingSettings,
}

/// Core server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind to
    pub bind_address: String,
    /// TCP port to listen on (0 picks an ephemeral port)
    pub port: u16,
    /// Accept queue length passed to listen(2)
    pub backlog: u32,
    /// Set SO_REUSEADDR before binding
    pub reuse_address: bool,
    /// Pause after a failed accept before retrying
    pub accept_retry_delay_ms: u64,
}

/// Connection worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Initial receive buffer capacity in bytes; doubles whenever it fills
    pub initial_buffer_capacity: usize,
    /// Bound on every socket read/write of a worker. None waits forever.
    pub io_timeout_secs: Option<u64>,
    /// Chunk size used when streaming the log back to a client
    pub stream_chunk_size: usize,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Path of the persisted log file
    pub log_path: PathBuf,
    /// Delete the log file during shutdown
    pub remove_on_shutdown: bool,
}

/// Timestamp ticker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TickerSettings {
    /// Enable the ticker
    pub enabled: bool,
    /// Seconds between two timestamp records
    pub interval_secs: u64,
    /// Literal prefix of every timestamp record
    pub tag: String,
    /// strftime pattern for the wall-clock time
    pub time_format: String,
}

/// Diagnostic logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,
    /// Output format (pretty, json)
    pub format: String,
    /// Send diagnostics to journald (requires the `journald` feature)
    pub journald: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 9000,
            backlog: 16,
            reuse_address: true,
            accept_retry_delay_ms: 100,
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            initial_buffer_capacity: 32,
            io_timeout_secs: None,
            stream_chunk_size: 4096,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("/var/tmp/aesdsocketdata"),
            remove_on_shutdown: true,
        }
    }
}

impl Default for TickerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            tag: "timestamp:".to_string(),
            time_format: "%a, %d %b %Y %H:%M:%S %z".to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            journald: false,
        }
    }
}

impl ServerSettings {
    /// `host:port` string for the listening socket
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Delay applied after a failed accept
    pub fn accept_retry_delay(&self) -> Duration {
        Duration::from_millis(self.accept_retry_delay_ms)
    }
}

impl ConnectionSettings {
    /// Per-operation I/O timeout, if any
    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_secs.map(Duration::from_secs)
    }
}

impl TickerSettings {
    /// Period between two ticks
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl ServerConfig {
    /// Load configuration: defaults, then an optional TOML file, then `LINELOG_*` env vars
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            ::config::Config::builder().add_source(::config::Config::try_from(&ServerConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(true),
            );
        }

        let config: ServerConfig = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LineLogError::Config(format!("Failed to read config file: {}", e)))?;

        let config: ServerConfig = toml::from_str(&content)
            .map_err(|e| LineLogError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| LineLogError::Config(format!("Failed to render config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.bind_address.is_empty() {
            return Err(LineLogError::Config("Bind address cannot be empty".to_string()));
        }
        if self.server.backlog == 0 {
            return Err(LineLogError::Config("Backlog must be at least 1".to_string()));
        }
        if self.connection.initial_buffer_capacity == 0 {
            return Err(LineLogError::Config(
                "Initial buffer capacity must be at least 1 byte".to_string(),
            ));
        }
        if self.connection.stream_chunk_size == 0 {
            return Err(LineLogError::Config(
                "Stream chunk size must be at least 1 byte".to_string(),
            ));
        }
        if self.storage.log_path.as_os_str().is_empty() {
            return Err(LineLogError::Config("Log path cannot be empty".to_string()));
        }
        if self.ticker.enabled && self.ticker.interval_secs == 0 {
            return Err(LineLogError::Config(
                "Ticker interval must be at least 1 second".to_string(),
            ));
        }
        if self.ticker.enabled
            && StrftimeItems::new(&self.ticker.time_format).any(|item| matches!(item, Item::Error))
        {
            return Err(LineLogError::Config(format!(
                "Invalid ticker time format: {}",
                self.ticker.time_format
            )));
        }
        match self.logging.format.as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(LineLogError::Config(format!("Unknown log format: {}", other))),
        }
    }
}
