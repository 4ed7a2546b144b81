//! LineLog server implementation

pub mod connection;
pub mod listener;
pub mod registry;
pub mod shutdown;
pub mod storage;
pub mod ticker;

use crate::config::ServerConfig;
use crate::{LineLogError, Result};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

pub use connection::{handle_connection, WorkerOutcome};
pub use listener::{bind_listener, ConnectionSource, ListenerLoop, ListenerState};
pub use registry::{WorkerId, WorkerRegistry};
pub use shutdown::{wait_for_signal, ShutdownCoordinator, ShutdownHandle};
pub use storage::LogStore;
pub use ticker::TimestampTicker;

/// Process-wide server state, owned explicitly instead of living in globals
struct ServerState {
    config: ServerConfig,
    local_addr: SocketAddr,
    listener: Mutex<Option<std::net::TcpListener>>,
    store: Arc<LogStore>,
    registry: Arc<WorkerRegistry>,
    coordinator: ShutdownCoordinator,
}

/// Main LineLog server that coordinates all components
#[derive(Clone)]
pub struct LineLogServer {
    state: Arc<ServerState>,
}

impl LineLogServer {
    /// Bind the configured address and create the log store
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let listener = bind_listener(&config.server)?;
        Self::from_listener(config, listener).await
    }

    /// Build a server around an already bound listener (daemon mode binds
    /// before the runtime exists)
    pub async fn from_listener(
        config: ServerConfig,
        listener: std::net::TcpListener,
    ) -> Result<Self> {
        config.validate()?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| LineLogError::Setup(format!("Listener has no local address: {}", e)))?;
        let store = Arc::new(LogStore::create(&config.storage.log_path).await?);

        Ok(Self {
            state: Arc::new(ServerState {
                config,
                local_addr,
                listener: Mutex::new(Some(listener)),
                store,
                registry: Arc::new(WorkerRegistry::new()),
                coordinator: ShutdownCoordinator::new(ShutdownHandle::new()),
            }),
        })
    }

    /// Address the server listens on
    pub fn local_addr(&self) -> SocketAddr {
        self.state.local_addr
    }

    /// Handle that stops the server when triggered
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.state.coordinator.handle().clone()
    }

    /// The shared log
    pub fn store(&self) -> &Arc<LogStore> {
        &self.state.store
    }

    /// The worker registry
    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.state.registry
    }

    /// Effective configuration
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Serve until the shutdown handle is triggered, then tear everything down
    pub async fn run(&self) -> Result<()> {
        let state = &self.state;
        if !state.coordinator.enter_loop().await? {
            info!("Shutdown requested before the server started");
            return self.shutdown().await;
        }

        let served = self.serve().await;
        state.coordinator.loop_stopped();
        served?;

        self.shutdown().await
    }

    async fn serve(&self) -> Result<()> {
        let state = &self.state;
        let listener = state
            .listener
            .lock()
            .take()
            .ok_or_else(|| LineLogError::Setup("Listening socket already closed".to_string()))?;
        let stop = state.coordinator.handle().token();

        let listener_loop = ListenerLoop::new(
            listener,
            Arc::clone(&state.store),
            Arc::clone(&state.registry),
            state.config.connection.clone(),
            state.config.server.accept_retry_delay(),
            stop.clone(),
        )?;

        if state.config.ticker.enabled {
            let ticker = TimestampTicker::new(&state.config.ticker, Arc::clone(&state.store));
            state.coordinator.set_ticker(ticker.spawn(stop.clone()));
        }

        info!(address = %state.local_addr, log = %state.store.path().display(), "Server running");
        let accepted = listener_loop.run().await;
        debug!(accepted, "Accept loop finished");
        Ok(())
    }

    /// Stop accepting, join every worker, close the log and delete it.
    /// Safe to call any number of times.
    pub async fn shutdown(&self) -> Result<()> {
        let state = &self.state;
        state
            .coordinator
            .shutdown(
                &state.listener,
                &state.store,
                state.config.storage.remove_on_shutdown,
            )
            .await
    }
}
