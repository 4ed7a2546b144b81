//! Client that sends one message and reads back the whole log

use crate::{LineLogError, Result};
use std::future::Future;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

/// Client for a LineLog server. Every call uses a fresh connection, matching
/// the server's one-message-per-connection protocol.
#[derive(Debug, Clone)]
pub struct LineLogClient {
    addr: SocketAddr,
    timeout: Option<Duration>,
}

impl LineLogClient {
    /// Create a client for the server at `addr`
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            timeout: Some(Duration::from_secs(5)),
        }
    }

    /// Bound every call by `limit`; None waits forever
    pub fn with_timeout(mut self, limit: Option<Duration>) -> Self {
        self.timeout = limit;
        self
    }

    /// Server address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Send `message` and return the log the server streams back.
    ///
    /// A message without a trailing newline is terminated by half-closing the
    /// connection, which the server treats as end of message.
    pub async fn send(&self, message: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        let message = message.as_ref();
        self.bounded(async {
            let mut stream = TcpStream::connect(self.addr).await?;
            stream.write_all(message).await?;
            if message.last() != Some(&b'\n') {
                stream.shutdown().await?;
            }

            let mut response = Vec::new();
            stream.read_to_end(&mut response).await?;
            Ok::<_, LineLogError>(response)
        })
        .await
    }

    /// Send a message split into several writes with a pause between them
    pub async fn send_in_parts(&self, parts: &[&[u8]], pause: Duration) -> Result<Vec<u8>> {
        self.bounded(async {
            let mut stream = TcpStream::connect(self.addr).await?;
            for part in parts {
                stream.write_all(part).await?;
                stream.flush().await?;
                tokio::time::sleep(pause).await;
            }
            if parts.last().and_then(|part| part.last()) != Some(&b'\n') {
                stream.shutdown().await?;
            }

            let mut response = Vec::new();
            stream.read_to_end(&mut response).await?;
            Ok::<_, LineLogError>(response)
        })
        .await
    }

    /// Connect and disconnect without sending anything. Returns whatever the
    /// server sent before closing (nothing, for a well-behaved server).
    pub async fn connect_and_close(&self) -> Result<Vec<u8>> {
        self.bounded(async {
            let mut stream = TcpStream::connect(self.addr).await?;
            stream.shutdown().await?;

            let mut response = Vec::new();
            stream.read_to_end(&mut response).await?;
            Ok::<_, LineLogError>(response)
        })
        .await
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.timeout {
            Some(limit) => timeout(limit, fut).await.map_err(|_| {
                LineLogError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("request to {} timed out", self.addr),
                ))
            })?,
            None => fut.await,
        }
    }
}
