//! # LineLog - Concurrent TCP Line-Log Server
//!
//! LineLog accepts TCP connections, appends every newline-terminated message a client
//! sends to one shared append-only log file, and streams the whole accumulated log back
//! to that client before closing the connection. A background ticker appends a
//! timestamp record to the same log at a fixed interval.
//!
//! ## Features
//!
//! - **One worker per connection**: slow clients never stall the accept loop
//! - **Serialized log access**: appends and full reads share one exclusive guard
//! - **Worker registry**: finished workers are reaped on every accept, drained on exit
//! - **Graceful shutdown**: SIGINT/SIGTERM stop the listener, join workers, delete the log
//! - **Daemon mode**: bind first, then detach from the controlling terminal
//!
//! ## Quick Start
//!
//! ### Server
//! ```no_run
//! use linelog::config::ServerConfig;
//! use linelog::server::{wait_for_signal, LineLogServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::load(None)?;
//!     let server = LineLogServer::bind(config).await?;
//!
//!     let shutdown = server.shutdown_handle();
//!     tokio::spawn(async move {
//!         wait_for_signal().await;
//!         shutdown.trigger();
//!     });
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ### Client
//! ```no_run
//! use linelog::client::LineLogClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = LineLogClient::new("127.0.0.1:9000".parse()?);
//!     let log = client.send(b"hello\n").await?;
//!     print!("{}", String::from_utf8_lossy(&log));
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
#[cfg(unix)]
pub mod daemon;
pub mod server;
pub mod types;

/// Common error types used throughout LineLog
pub mod error {
    use std::fmt;

    /// LineLog error types
    #[derive(Debug)]
    pub enum LineLogError {
        /// I/O operation failed
        Io(std::io::Error),
        /// Configuration error
        Config(String),
        /// Server could not be set up (socket, bind, log file)
        Setup(String),
        /// Receive buffer could not grow
        ResourceExhausted(String),
        /// The log store was already closed by shutdown
        StoreClosed,
        /// Detaching into the background failed
        Daemon(String),
    }

    impl fmt::Display for LineLogError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                LineLogError::Io(e) => write!(f, "I/O error: {}", e),
                LineLogError::Config(e) => write!(f, "Configuration error: {}", e),
                LineLogError::Setup(e) => write!(f, "Setup error: {}", e),
                LineLogError::ResourceExhausted(e) => write!(f, "Resource exhausted: {}", e),
                LineLogError::StoreClosed => write!(f, "Log store is closed"),
                LineLogError::Daemon(e) => write!(f, "Daemon error: {}", e),
            }
        }
    }

    impl std::error::Error for LineLogError {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            match self {
                LineLogError::Io(e) => Some(e),
                _ => None,
            }
        }
    }

    impl From<std::io::Error> for LineLogError {
        fn from(err: std::io::Error) -> Self {
            LineLogError::Io(err)
        }
    }

    impl From<::config::ConfigError> for LineLogError {
        fn from(err: ::config::ConfigError) -> Self {
            LineLogError::Config(err.to_string())
        }
    }

    /// Result type alias for LineLog operations
    pub type Result<T> = std::result::Result<T, LineLogError>;
}

pub use error::{LineLogError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::LineLogClient;
    pub use crate::config::ServerConfig;
    pub use crate::server::{LineLogServer, LogStore, ShutdownHandle};
    pub use crate::types::PendingMessage;
    pub use crate::{LineLogError, Result};
}
