//! Listening socket setup and the accept loop

use crate::config::{ConnectionSettings, ServerSettings};
use crate::server::connection::handle_connection;
use crate::server::{LogStore, WorkerRegistry};
use crate::{LineLogError, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Create, configure, bind and listen. Usable before any async runtime exists,
/// so daemon mode can report bind failures before detaching.
pub fn bind_listener(settings: &ServerSettings) -> Result<std::net::TcpListener> {
    let address = settings.listen_address();
    let addr: SocketAddr = address
        .to_socket_addrs()
        .map_err(|e| LineLogError::Setup(format!("Cannot resolve {}: {}", address, e)))?
        .next()
        .ok_or_else(|| LineLogError::Setup(format!("No address for {}", address)))?;

    let setup = |what: &str, e: io::Error| {
        LineLogError::Setup(format!("{} failed for {}: {}", what, addr, e))
    };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| setup("socket", e))?;
    if settings.reuse_address {
        socket
            .set_reuse_address(true)
            .map_err(|e| setup("setsockopt(SO_REUSEADDR)", e))?;
    }
    socket.bind(&addr.into()).map_err(|e| setup("bind", e))?;
    let backlog = i32::try_from(settings.backlog).unwrap_or(i32::MAX);
    socket.listen(backlog).map_err(|e| setup("listen", e))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| setup("set_nonblocking", e))?;

    info!(address = %addr, backlog, "Listening socket bound");
    Ok(socket.into())
}

/// Accept-loop states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Socket bound, loop not yet running
    Bound,
    /// Waiting in accept
    Accepting,
    /// Spawning a worker for a new connection
    Dispatching,
    /// Stop requested, draining workers
    Stopping,
    /// All workers joined
    Stopped,
}

/// Anything the accept loop can pull connections from
pub trait ConnectionSource: Send + 'static {
    /// Stream handed to a connection worker
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Wait for the next connection
    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Stream, SocketAddr)>> + Send;
}

impl ConnectionSource for TcpListener {
    type Stream = TcpStream;

    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Accepts connections and hands each to a registered worker
pub struct ListenerLoop<L = TcpListener> {
    listener: L,
    store: Arc<LogStore>,
    registry: Arc<WorkerRegistry>,
    connection: Arc<ConnectionSettings>,
    retry_delay: Duration,
    stop: CancellationToken,
    state: watch::Sender<ListenerState>,
}

impl ListenerLoop<TcpListener> {
    /// Wrap a bound std listener; must be called inside a tokio runtime
    pub fn new(
        listener: std::net::TcpListener,
        store: Arc<LogStore>,
        registry: Arc<WorkerRegistry>,
        connection: ConnectionSettings,
        retry_delay: Duration,
        stop: CancellationToken,
    ) -> Result<Self> {
        let listener = TcpListener::from_std(listener)
            .map_err(|e| LineLogError::Setup(format!("Failed to register listener: {}", e)))?;

        Ok(Self::with_source(
            listener,
            store,
            registry,
            connection,
            retry_delay,
            stop,
        ))
    }
}

impl<L: ConnectionSource> ListenerLoop<L> {
    /// Build a loop over any connection source
    pub fn with_source(
        listener: L,
        store: Arc<LogStore>,
        registry: Arc<WorkerRegistry>,
        connection: ConnectionSettings,
        retry_delay: Duration,
        stop: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ListenerState::Bound);
        Self {
            listener,
            store,
            registry,
            connection: Arc::new(connection),
            retry_delay,
            stop,
            state,
        }
    }

    /// Current state
    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// Follow state changes, including after [`run`](Self::run) consumed the loop
    pub fn subscribe(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    fn transition(&self, next: ListenerState) {
        let previous = self.state.send_replace(next);
        debug!(from = ?previous, to = ?next, "Listener state");
    }

    /// Accept until stopped, then drain every worker. Returns the number of
    /// connections accepted.
    pub async fn run(mut self) -> u64 {
        let mut accepted = 0u64;

        loop {
            self.transition(ListenerState::Accepting);
            let result = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                result = self.listener.accept() => result,
            };

            match result {
                Ok((stream, peer)) => {
                    self.transition(ListenerState::Dispatching);
                    accepted += 1;
                    info!(peer = %peer, "Accepted connection");

                    let store = Arc::clone(&self.store);
                    let settings = Arc::clone(&self.connection);
                    self.registry.spawn(peer, async move {
                        let outcome = handle_connection(stream, &store, &settings).await;
                        info!(peer = %peer, ?outcome, "Closed connection");
                    });

                    self.registry.reap_completed().await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    tokio::select! {
                        _ = self.stop.cancelled() => break,
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }

        self.transition(ListenerState::Stopping);
        let Self {
            listener,
            registry,
            state,
            ..
        } = self;
        // Refuse new clients while in-flight ones finish
        drop(listener);

        let drained = registry.drain_all().await;
        info!(accepted, drained, "Listener stopped");
        state.send_replace(ListenerState::Stopped);
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{tempdir, TempDir};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::timeout;

    /// Fails the first `failures` accepts, then serves from a real listener
    struct FlakySource {
        failures: Arc<AtomicUsize>,
        inner: TcpListener,
    }

    impl ConnectionSource for FlakySource {
        type Stream = TcpStream;

        fn accept(
            &mut self,
        ) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
            async move {
                let left = self.failures.load(Ordering::SeqCst);
                if left > 0 {
                    self.failures.store(left - 1, Ordering::SeqCst);
                    return Err(io::Error::new(io::ErrorKind::Other, "Too many open files"));
                }
                self.inner.accept().await
            }
        }
    }

    async fn flaky_loop(
        failures: usize,
        retry_delay: Duration,
    ) -> (TempDir, SocketAddr, Arc<AtomicUsize>, ListenerLoop<FlakySource>) {
        let temp_dir = tempdir().unwrap();
        let store = Arc::new(LogStore::create(temp_dir.path().join("data")).await.unwrap());
        let inner = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = inner.local_addr().unwrap();
        let failures = Arc::new(AtomicUsize::new(failures));
        let source = FlakySource {
            failures: Arc::clone(&failures),
            inner,
        };

        let listener_loop = ListenerLoop::with_source(
            source,
            store,
            Arc::new(WorkerRegistry::new()),
            ConnectionSettings::default(),
            retry_delay,
            CancellationToken::new(),
        );
        (temp_dir, addr, failures, listener_loop)
    }

    fn loopback() -> ServerSettings {
        ServerSettings {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            ..ServerSettings::default()
        }
    }

    #[test]
    fn test_bind_ephemeral_port() {
        let listener = bind_listener(&loopback()).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_bind_conflict_is_setup_error() {
        let first = bind_listener(&loopback()).unwrap();
        let settings = ServerSettings {
            port: first.local_addr().unwrap().port(),
            reuse_address: false,
            ..loopback()
        };

        assert!(matches!(bind_listener(&settings), Err(LineLogError::Setup(_))));
    }

    #[test]
    fn test_bind_unresolvable_address() {
        let settings = ServerSettings {
            bind_address: "not an address".to_string(),
            ..loopback()
        };

        assert!(matches!(bind_listener(&settings), Err(LineLogError::Setup(_))));
    }

    #[tokio::test]
    async fn test_loop_serves_then_drains_on_stop() {
        let temp_dir = tempdir().unwrap();
        let store = Arc::new(LogStore::create(temp_dir.path().join("data")).await.unwrap());
        let registry = Arc::new(WorkerRegistry::new());
        let stop = CancellationToken::new();

        let std_listener = bind_listener(&loopback()).unwrap();
        let addr = std_listener.local_addr().unwrap();
        let listener_loop = ListenerLoop::new(
            std_listener,
            Arc::clone(&store),
            Arc::clone(&registry),
            ConnectionSettings::default(),
            Duration::from_millis(10),
            stop.clone(),
        )
        .unwrap();
        assert_eq!(listener_loop.state(), ListenerState::Bound);
        let mut state = listener_loop.subscribe();
        let handle = tokio::spawn(listener_loop.run());
        state
            .wait_for(|s| *s == ListenerState::Accepting)
            .await
            .unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"ping\n").await.unwrap();
        let mut echoed = Vec::new();
        client.read_to_end(&mut echoed).await.unwrap();
        assert_eq!(echoed, b"ping\n");

        stop.cancel();
        let accepted = timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert_eq!(accepted, 1);
        assert!(registry.is_empty());
        assert_eq!(*state.borrow(), ListenerState::Stopped);
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_accept_errors_are_retried() {
        let (_dir, addr, failures, listener_loop) =
            flaky_loop(3, Duration::from_millis(10)).await;
        let stop = listener_loop.stop.clone();
        let handle = tokio::spawn(listener_loop.run());

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"still here\n").await.unwrap();
        let mut echoed = Vec::new();
        timeout(Duration::from_secs(2), client.read_to_end(&mut echoed))
            .await
            .expect("loop stopped serving after accept errors")
            .unwrap();
        assert_eq!(echoed, b"still here\n");
        assert_eq!(failures.load(Ordering::SeqCst), 0);

        stop.cancel();
        let accepted = timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert_eq!(accepted, 1);
    }

    #[tokio::test]
    async fn test_stop_interrupts_retry_delay() {
        let (_dir, _addr, failures, listener_loop) =
            flaky_loop(usize::MAX, Duration::from_secs(3600)).await;
        let stop = listener_loop.stop.clone();
        let mut state = listener_loop.subscribe();
        let handle = tokio::spawn(listener_loop.run());

        // First failure puts the loop into its retry pause
        while failures.load(Ordering::SeqCst) == usize::MAX {
            tokio::task::yield_now().await;
        }
        stop.cancel();

        let accepted = timeout(Duration::from_secs(1), handle)
            .await
            .expect("stop did not interrupt the retry pause")
            .unwrap();
        assert_eq!(accepted, 0);
        assert_eq!(*state.borrow_and_update(), ListenerState::Stopped);
    }
}
