//! Periodic timestamp records

use crate::config::TickerSettings;
use crate::server::LogStore;
use crate::types::TimestampFormat;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Appends a timestamp record to the log once per interval
pub struct TimestampTicker {
    period: Duration,
    format: TimestampFormat,
    store: Arc<LogStore>,
}

impl TimestampTicker {
    /// Create a ticker writing to `store`
    pub fn new(settings: &TickerSettings, store: Arc<LogStore>) -> Self {
        Self {
            period: settings.interval(),
            format: TimestampFormat::new(settings.tag.clone(), settings.time_format.clone()),
            store,
        }
    }

    /// Run the ticker on its own task until `stop` is cancelled
    pub fn spawn(self, stop: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(stop))
    }

    /// Tick until `stop` is cancelled. A tick already appending finishes first.
    pub async fn run(self, stop: CancellationToken) {
        // First record one full period after start
        let mut ticks = interval_at(Instant::now() + self.period, self.period);
        info!(period = ?self.period, "Timestamp ticker started");

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticks.tick() => self.tick().await,
            }
        }

        info!("Timestamp ticker stopped");
    }

    async fn tick(&self) {
        let Some(record) = self.format.record_now() else {
            warn!("Timestamp pattern could not be rendered");
            return;
        };

        match self.store.append(record.as_bytes()).await {
            Ok(()) => debug!(record = record.trim_end(), "Timestamp appended"),
            Err(e) => warn!(error = %e, "Failed to append timestamp"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::time::sleep;

    fn fast_settings() -> TickerSettings {
        TickerSettings {
            interval_secs: 1,
            ..TickerSettings::default()
        }
    }

    #[tokio::test]
    async fn test_no_record_before_first_period() {
        let temp_dir = tempdir().unwrap();
        let store = Arc::new(LogStore::create(temp_dir.path().join("data")).await.unwrap());
        let stop = CancellationToken::new();

        let handle = TimestampTicker::new(&fast_settings(), Arc::clone(&store)).spawn(stop.clone());
        sleep(Duration::from_millis(300)).await;
        stop.cancel();
        handle.await.unwrap();

        assert!(store.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ticks_append_tagged_lines() {
        let temp_dir = tempdir().unwrap();
        let store = Arc::new(LogStore::create(temp_dir.path().join("data")).await.unwrap());
        let stop = CancellationToken::new();

        let handle = TimestampTicker::new(&fast_settings(), Arc::clone(&store)).spawn(stop.clone());
        sleep(Duration::from_millis(2500)).await;
        stop.cancel();
        handle.await.unwrap();

        let content = String::from_utf8(store.snapshot().await.unwrap()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|line| line.starts_with("timestamp:")));
        assert!(content.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_no_tick_after_stop() {
        let temp_dir = tempdir().unwrap();
        let store = Arc::new(LogStore::create(temp_dir.path().join("data")).await.unwrap());
        let stop = CancellationToken::new();
        stop.cancel();

        TimestampTicker::new(&fast_settings(), Arc::clone(&store))
            .run(stop)
            .await;
        sleep(Duration::from_millis(1200)).await;

        assert!(store.snapshot().await.unwrap().is_empty());
    }
}
