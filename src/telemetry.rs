//! Graphite telemetry reporter.
//!
//! Pushes the received-metric counter to a Graphite plaintext endpoint at a
//! fixed interval:
//!
//! ```text
//! carbon.writer.<hostname>.metricsReceived <value> <unix-seconds>\n
//! ```

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{interval, timeout};

use crate::metrics::IngestMetrics;

/// Prefix of every reported metric.
const METRIC_PREFIX: &str = "carbon.writer";

/// Errors from a single report attempt.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {0:?} talking to graphite")]
    Timeout(Duration),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Periodic Graphite reporter.
pub struct GraphiteReporter {
    address: String,
    interval: Duration,
    timeout: Duration,
    hostname: String,
    metrics: Arc<IngestMetrics>,
}

impl GraphiteReporter {
    pub fn new(
        address: impl Into<String>,
        interval: Duration,
        timeout: Duration,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            address: address.into(),
            interval,
            timeout,
            hostname: local_hostname(),
            metrics,
        }
    }

    /// Override the reported host name.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Report forever. Failures are logged and retried on the next tick.
    pub async fn run(self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;

        tracing::info!(
            address = %self.address,
            interval_secs = self.interval.as_secs(),
            hostname = %self.hostname,
            "Graphite reporter started"
        );

        loop {
            ticker.tick().await;
            if let Err(e) = self.report_once().await {
                tracing::warn!(address = %self.address, error = %e, "Failed to report telemetry");
            }
        }
    }

    /// Send one report line.
    pub async fn report_once(&self) -> Result<(), TelemetryError> {
        let line = format_line(
            &self.hostname,
            self.metrics.metrics_received(),
            chrono::Utc::now().timestamp(),
        );

        let send = async {
            let mut stream =
                TcpStream::connect(&self.address)
                    .await
                    .map_err(|source| TelemetryError::Connect {
                        address: self.address.clone(),
                        source,
                    })?;
            stream.write_all(line.as_bytes()).await?;
            stream.shutdown().await?;
            Ok::<_, TelemetryError>(())
        };

        timeout(self.timeout, send)
            .await
            .map_err(|_| TelemetryError::Timeout(self.timeout))??;

        tracing::debug!(line = %line.trim_end(), "Reported telemetry");
        Ok(())
    }
}

/// Format one Graphite plaintext line.
pub fn format_line(hostname: &str, value: u64, timestamp: i64) -> String {
    format!(
        "{METRIC_PREFIX}.{}.metricsReceived {value} {timestamp}\n",
        hostname.replace('.', "_")
    )
}

/// Host name of this machine, used in the metric path.
pub fn local_hostname() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|s| !s.is_empty()))
        .unwrap_or_else(|| "localhost".to_string())
}
