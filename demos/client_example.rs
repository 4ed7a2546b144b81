//! LineLog Client Example

use linelog::client::LineLogClient;
use tokio::time::{sleep, Duration};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Starting LineLog Client Example");

    let client = LineLogClient::new("127.0.0.1:9000".parse()?);

    for i in 1..=5 {
        match client.send(format!("Processing iteration {}\n", i)).await {
            Ok(log) => {
                println!("--- log after message {} ---", i);
                print!("{}", String::from_utf8_lossy(&log));
            }
            Err(e) => {
                eprintln!("Failed to reach {}: {}", client.addr(), e);
                eprintln!("Make sure the server is running");
                return Ok(());
            }
        }
        sleep(Duration::from_millis(500)).await;
    }

    // A message without a newline ends when the client half-closes
    let log = client
        .send_in_parts(&[&b"split "[..], &b"message"[..]], Duration::from_millis(100))
        .await?;
    println!("--- final log ({} bytes) ---", log.len());
    print!("{}", String::from_utf8_lossy(&log));

    Ok(())
}
