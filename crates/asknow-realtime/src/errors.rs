//! Error types for the realtime server.

use thiserror::Error;

use crate::close::CloseReason;

/// Why a frame could not be queued for a connection.
#[derive(Debug, Error)]
pub enum SendError {
    /// The connection is closed (or superseded) and accepts no more frames.
    #[error("connection closed: {0}")]
    Closed(CloseReason),
    /// The outbound queue is full.
    #[error("outbound queue full")]
    QueueFull,
    /// The writer task is gone.
    #[error("connection writer disconnected")]
    Disconnected,
    /// The queue stayed full past the bound.
    #[error("timed out waiting for queue capacity")]
    Timeout,
    /// The frame could not be serialized.
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors starting the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding the listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Other listener I/O failure.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Installing the metrics recorder failed.
    #[error("metrics recorder: {0}")]
    Metrics(String),
}
