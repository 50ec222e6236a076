//! Ingest Layer
//!
//! TCP plaintext receiver. One task per accepted connection, unbounded.
//!
//! - [`IngestListener`]: binds the port and runs the accept loop
//! - [`ConnectionHandler`]: per-connection read/decode/write loop

mod connection;
mod listener;

pub use connection::ConnectionHandler;
pub use listener::{ACCEPT_ERROR_BACKOFF, IngestError, IngestListener};
