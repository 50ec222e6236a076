//! Per-connection read loop.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::protocol::{Sample, decode_line};
use crate::storage::{StorageOrchestrator, TimeSeriesBackend, WriteOutcome, panic_message};

/// Initial read buffer per connection; lines may grow past it.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Handles one accepted connection until the peer closes it or a read fails.
pub struct ConnectionHandler<B: TimeSeriesBackend> {
    orchestrator: Arc<StorageOrchestrator<B>>,
    peer: SocketAddr,
}

impl<B: TimeSeriesBackend> ConnectionHandler<B> {
    pub fn new(orchestrator: Arc<StorageOrchestrator<B>>, peer: SocketAddr) -> Self {
        Self { orchestrator, peer }
    }

    /// Read newline-terminated records and write each valid sample.
    ///
    /// Samples are written one at a time, in arrival order. A fragment left
    /// without a terminating newline at EOF is discarded.
    pub async fn handle<R>(self, stream: R)
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, stream);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) if buf.last() != Some(&b'\n') => {
                    tracing::debug!(peer = %self.peer, bytes = buf.len(), "Discarding unterminated line at EOF");
                    break;
                }
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    match decode_line(&line) {
                        Ok(sample) => self.write(sample).await,
                        Err(e) => {
                            self.orchestrator.metrics().line_rejected();
                            tracing::warn!(peer = %self.peer, error = %e, "Dropping line");
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(peer = %self.peer, error = %e, "Connection read error");
                    break;
                }
            }
        }

        self.orchestrator.metrics().connection_closed();
        tracing::debug!(peer = %self.peer, "Connection closed");
    }

    /// Run the blocking write on the blocking pool and wait for it.
    async fn write(&self, sample: Sample) {
        let orchestrator = Arc::clone(&self.orchestrator);
        let metric = sample.metric.clone();

        match tokio::task::spawn_blocking(move || orchestrator.write(&sample)).await {
            Ok(outcome @ WriteOutcome::Updated { .. }) => {
                tracing::debug!(peer = %self.peer, metric = %metric, path = %outcome.path().display(), "Sample written");
            }
            Ok(_) => {}
            Err(e) => {
                let reason = if e.is_panic() {
                    panic_message(e.into_panic().as_ref())
                } else {
                    e.to_string()
                };
                tracing::error!(peer = %self.peer, metric = %metric, error = %reason, "Write task failed");
            }
        }
    }
}
