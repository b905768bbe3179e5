//! Error types for the chat relay

use std::io;

use thiserror::Error;

/// Failures surfaced by the relay server and the console client.
///
/// Only `Bind` and `Accept` end the server; the per-connection variants are
/// logged inside the owning handler and never reach the accept loop.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The listening socket could not be created or bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// `accept` failed inside the server loop
    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    /// Reading the next line from a peer failed
    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    /// Writing to a registered sink failed
    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    /// Shutting down a connection failed
    #[error("close failed: {0}")]
    Close(#[source] io::Error),

    /// The tokio runtime could not be built
    #[error("failed to build tokio runtime: {0}")]
    Runtime(#[source] io::Error),

    /// The client could not reach the relay
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Configuration could not be interpreted
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
