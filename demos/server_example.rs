//! LineLog Server Example

use linelog::config::ServerConfig;
use linelog::server::{wait_for_signal, LineLogServer};
use tempfile::tempdir;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Starting LineLog Server Example");

    // Keep the log in a temporary directory for this example
    let temp_dir = tempdir()?;

    let mut config = ServerConfig::default();
    config.server.bind_address = "127.0.0.1".to_string();
    config.storage.log_path = temp_dir.path().join("linelog-example.log");
    config.ticker.interval_secs = 5;

    println!("Configuration created:");
    println!("  Listen: {}", config.server.listen_address());
    println!("  Log file: {}", config.storage.log_path.display());

    let server = LineLogServer::bind(config).await?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.trigger();
    });

    println!("LineLog server listening on {}", server.local_addr());
    println!("Press Ctrl+C to stop the server");

    if let Err(e) = server.run().await {
        eprintln!("Server error: {}", e);
    }

    println!("Server stopped");
    Ok(())
}
