//! Configuration management for LineLog

pub mod settings;

pub use settings::{
    ConnectionSettings, LoggingSettings, ServerConfig, ServerSettings, StorageSettings,
    TickerSettings, ENV_PREFIX,
};
