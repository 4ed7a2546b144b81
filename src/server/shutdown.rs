//! Graceful shutdown coordination

use crate::server::LogStore;
use crate::{LineLogError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Cloneable stop request shared by the signal listener, the accept loop,
/// the ticker and callers of the server.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    /// Create an untriggered handle
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Triggering more than once has no further effect.
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            info!("Shutdown requested");
            self.token.cancel();
        }
    }

    /// Whether shutdown was requested
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown was requested
    pub async fn triggered(&self) {
        self.token.cancelled().await
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Resolves on SIGINT or SIGTERM
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Caught SIGINT"),
        _ = terminate => info!("Caught SIGTERM"),
    }
}

/// Runs teardown exactly once: stop the ticker and the accept loop, wait for
/// the loop to drain, join the ticker, close the listener and the log, delete
/// the log file.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    stop: ShutdownHandle,
    ticker: Mutex<Option<JoinHandle<()>>>,
    loop_running: AtomicBool,
    loop_finished: CancellationToken,
    torn_down: tokio::sync::Mutex<bool>,
}

impl ShutdownCoordinator {
    /// Create a coordinator around `stop`
    pub fn new(stop: ShutdownHandle) -> Self {
        Self {
            stop,
            ..Self::default()
        }
    }

    /// The stop request this coordinator honours
    pub fn handle(&self) -> &ShutdownHandle {
        &self.stop
    }

    pub(crate) fn set_ticker(&self, handle: JoinHandle<()>) {
        *self.ticker.lock() = Some(handle);
    }

    /// Claim the right to run the accept loop. Returns `Ok(false)` when
    /// shutdown was already requested, in which case the loop must not start.
    ///
    /// Runs under the teardown lock, so a concurrent [`shutdown`](Self::shutdown)
    /// either sees the loop as running or the loop sees the stop request.
    pub(crate) async fn enter_loop(&self) -> Result<bool> {
        // Teardown always triggers the stop first, so a torn-down server is refused here too
        let _torn_down = self.torn_down.lock().await;
        if self.stop.is_triggered() {
            return Ok(false);
        }
        if self.loop_running.swap(true, Ordering::AcqRel) {
            return Err(LineLogError::Setup("Server already running".to_string()));
        }
        Ok(true)
    }

    pub(crate) fn loop_stopped(&self) {
        self.loop_finished.cancel();
    }

    /// Shut down. Every call after the first returns Ok without side effects.
    pub async fn shutdown(
        &self,
        listener: &Mutex<Option<std::net::TcpListener>>,
        store: &LogStore,
        remove_log: bool,
    ) -> Result<()> {
        self.stop.trigger();

        let mut torn_down = self.torn_down.lock().await;
        if *torn_down {
            return Ok(());
        }

        // The ticker is registered by the running loop, so join it only once the loop is done
        if self.loop_running.load(Ordering::Acquire) {
            self.loop_finished.cancelled().await;
        }

        let ticker = self.ticker.lock().take();
        if let Some(ticker) = ticker {
            if let Err(e) = ticker.await {
                warn!(error = %e, "Ticker terminated abnormally");
            }
        }

        // Only present when the accept loop never took it
        if listener.lock().take().is_some() {
            info!("Listening socket closed");
        }

        let mut first_error = None;
        if let Err(e) = store.close().await {
            warn!(error = %e, "Failed to close log store");
            first_error.get_or_insert(e);
        }
        if remove_log {
            if let Err(e) = store.remove().await {
                warn!(error = %e, path = %store.path().display(), "Failed to remove log file");
                first_error.get_or_insert(e);
            }
        }

        *torn_down = true;
        info!("Shutdown complete");
        first_error.map_or(Ok(()), Err)
    }
}
