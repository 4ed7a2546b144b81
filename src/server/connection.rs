//! Per-connection worker: receive one message, append it, stream the log back

use crate::config::ConnectionSettings;
use crate::server::LogStore;
use crate::types::PendingMessage;
use crate::{LineLogError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

/// How a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// The peer closed without sending anything
    Empty,
    /// A message was received; `logged` is false when the append failed
    Served {
        /// Bytes received from the client
        received: usize,
        /// Whether the append succeeded
        logged: bool,
        /// Bytes streamed back, None if streaming failed
        streamed: Option<u64>,
    },
    /// Receiving failed; nothing was logged or streamed
    Aborted(String),
}

/// Run one connection to completion. Never returns an error: every failure
/// ends this connection only and is reported through the outcome.
pub async fn handle_connection<S>(
    mut stream: S,
    store: &LogStore,
    settings: &ConnectionSettings,
) -> WorkerOutcome
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let timeout = settings.io_timeout();

    let outcome = match receive_message(&mut stream, settings.initial_buffer_capacity, timeout).await
    {
        Ok(message) if message.is_empty() => {
            trace!("Peer closed without sending data");
            WorkerOutcome::Empty
        }
        Ok(message) => {
            let received = message.len();
            let bytes = message.into_bytes();

            let logged = match store.append(&bytes).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, bytes = received, "Failed to append message to log");
                    false
                }
            };

            let streamed = match store
                .stream_all_bounded(&mut stream, settings.stream_chunk_size, timeout)
                .await
            {
                Ok(n) => Some(n),
                Err(e) => {
                    warn!(error = %e, "Failed to stream log to client");
                    None
                }
            };

            WorkerOutcome::Served {
                received,
                logged,
                streamed,
            }
        }
        Err(e) => {
            debug!(error = %e, "Abandoning message");
            WorkerOutcome::Aborted(e.to_string())
        }
    };

    if let Err(e) = stream.shutdown().await {
        trace!(error = %e, "Shutdown of client stream failed");
    }
    outcome
}

/// Read until the last received byte is a newline or the peer closes.
///
/// Bytes received before a close are returned as the message even without a
/// trailing newline.
pub async fn receive_message<R>(
    reader: &mut R,
    initial_capacity: usize,
    timeout: Option<Duration>,
) -> Result<PendingMessage>
where
    R: AsyncRead + Unpin,
{
    let mut message = PendingMessage::with_capacity(initial_capacity)?;

    loop {
        if message.is_full() {
            message.grow()?;
            debug!(capacity = message.capacity(), "Receive buffer doubled");
        }

        let n = with_timeout(timeout, async {
            Ok::<_, LineLogError>(reader.read(message.unfilled_mut()).await?)
        })
        .await?;
        if n == 0 {
            break;
        }

        message.advance(n);
        trace!(read = n, total = message.len(), "Received bytes");
        if message.ends_with_newline() {
            break;
        }
    }

    Ok(message)
}

async fn with_timeout<T, F>(timeout: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
            LineLogError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("client I/O exceeded {:?}", limit),
            ))
        })?,
        None => fut.await,
    }
}
