//! Error types for sleepcast-player
//!
//! Defines module-specific error types using thiserror for clear error propagation.
//! Per-episode failures (`Fetch`, `Network`, `Decode`) are recovered by the
//! scheduler's failure policy; feed failures are surfaced to the caller.

use thiserror::Error;

/// Main error type for sleepcast-player
#[derive(Error, Debug)]
pub enum Error {
    /// Feed unreachable, unparseable or without playable episodes
    #[error("Feed error: {0}")]
    Feed(String),

    /// Upstream answered with an unusable status
    #[error("Audio fetch failed ({status}): {message}")]
    Fetch { status: u16, message: String },

    /// Transport-level failure (connect, timeout, body read)
    #[error("Network error: {0}")]
    Network(String),

    /// Audio payload could not be decoded
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Catalog has nothing to play
    #[error("No episodes loaded")]
    NoEpisodes,

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors from the common crate
    #[error(transparent)]
    Common(#[from] sleepcast_common::Error),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Network(e.to_string())
    }
}

/// Convenience Result type using sleepcast-player Error
pub type Result<T> = std::result::Result<T, Error>;
