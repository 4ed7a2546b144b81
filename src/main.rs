//! LineLog Server Binary
//!
//! Accepts newline-terminated messages on TCP, appends them to a shared log
//! and streams the log back to each client.

use clap::Parser;
use linelog::config::{LoggingSettings, ServerConfig};
use linelog::server::{bind_listener, wait_for_signal, LineLogServer};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Parser)]
#[command(name = "linelog-server")]
#[command(about = "Concurrent TCP line-log server")]
#[command(version)]
struct Args {
    /// Detach and run in the background
    #[arg(short, long)]
    daemon: bool,

    /// Configuration file path
    #[arg(short, long, default_value = "config/server.toml")]
    config: PathBuf,

    /// TCP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Path of the shared log file
    #[arg(short, long)]
    log_path: Option<PathBuf>,

    /// Disable the timestamp ticker
    #[arg(long)]
    no_ticker: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config_file = args.config.exists().then_some(args.config.as_path());
    let mut config = ServerConfig::load(config_file)?;

    // Override config with CLI arguments
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(log_path) = args.log_path {
        config.storage.log_path = log_path;
    }
    if args.no_ticker {
        config.ticker.enabled = false;
    }
    config.validate()?;

    if args.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    init_tracing(&config.logging, args.verbose)?;
    info!("Starting LineLog Server v{}", env!("CARGO_PKG_VERSION"));
    match config_file {
        Some(path) => info!(path = %path.display(), "Configuration loaded"),
        None => info!("Config file not found, using defaults"),
    }

    // Bind before detaching so the invoking shell sees bind failures
    let listener = bind_listener(&config.server).map_err(|e| {
        error!(error = %e, "Failed to set up listening socket");
        e
    })?;

    if args.daemon {
        #[cfg(unix)]
        {
            linelog::daemon::daemonize()?;
            info!(pid = std::process::id(), "Running as daemon");
        }
        #[cfg(not(unix))]
        tracing::warn!("Daemon mode is only supported on Unix; staying in foreground");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    if let Err(e) = runtime.block_on(serve(config, listener)) {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    info!("LineLog Server stopped");
    Ok(())
}

async fn serve(config: ServerConfig, listener: std::net::TcpListener) -> linelog::Result<()> {
    let server = LineLogServer::from_listener(config, listener).await?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.trigger();
    });

    server.run().await
}

fn init_tracing(
    settings: &LoggingSettings,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let filter = if verbose {
        EnvFilter::new("linelog=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level))
    };

    let fmt_layer = match settings.format.as_str() {
        "json" => tracing_subscriber::fmt::layer()
            .json()
            .with_thread_ids(true)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(fmt_layer).with(filter);

    #[cfg(feature = "journald")]
    {
        let journald = if settings.journald {
            Some(tracing_journald::layer()?)
        } else {
            None
        };
        subscriber.with(journald).try_init()?;
    }

    #[cfg(not(feature = "journald"))]
    {
        if settings.journald {
            eprintln!("journald output requested but the `journald` feature is disabled");
        }
        subscriber.try_init()?;
    }

    Ok(())
}
