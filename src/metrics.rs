//! Process-wide ingestion counters.
//!
//! [`IngestMetrics`] is the only mutable state shared between connection
//! workers. All counters are relaxed atomics: they are observational and
//! never gate ingestion.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Build identity reported by the stats endpoint and telemetry.
pub const BUILD_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Ingestion counters.
#[derive(Debug, Default)]
pub struct IngestMetrics {
    /// Samples that obtained a series handle (opened or created).
    metrics_received: AtomicU64,
    /// Connections accepted since startup.
    connections_accepted: AtomicU64,
    /// Connections currently being served.
    connections_active: AtomicU64,
    /// Lines rejected by the decoder.
    lines_rejected: AtomicU64,
}

/// Point-in-time copy of [`IngestMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub metrics_received: u64,
    pub connections_accepted: u64,
    pub connections_active: u64,
    pub lines_rejected: u64,
}

impl IngestMetrics {
    pub const fn new() -> Self {
        Self {
            metrics_received: AtomicU64::new(0),
            connections_accepted: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            lines_rejected: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn metric_received(&self) {
        self.metrics_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn metrics_received(&self) -> u64 {
        self.metrics_received.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn line_rejected(&self) {
        self.lines_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a newly accepted connection.
    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            metrics_received: self.metrics_received.load(Ordering::Relaxed),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            lines_rejected: self.lines_rejected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters() {
        let metrics = IngestMetrics::new();
        metrics.metric_received();
        metrics.metric_received();
        metrics.line_rejected();
        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();

        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                metrics_received: 2,
                connections_accepted: 2,
                connections_active: 1,
                lines_rejected: 1,
            }
        );
    }

    #[test]
    fn test_concurrent_increments() {
        let metrics = Arc::new(IngestMetrics::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.metric_received();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(metrics.metrics_received(), 8000);
    }
}
