//! Common error types for Sleepcast

use thiserror::Error;

/// Common result type for Sleepcast operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the Sleepcast crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "sleepcast.toml");
        let error: Error = io.into();
        assert!(matches!(error, Error::Io(_)));
        assert_eq!(error.to_string(), "IO error: sleepcast.toml");
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            Error::Config("bad level".to_string()).to_string(),
            "Configuration error: bad level"
        );
        assert_eq!(
            Error::NotFound("Unknown noise preset: hum".to_string()).to_string(),
            "Not found: Unknown noise preset: hum"
        );
        assert_eq!(
            Error::Internal("worker gone".to_string()).to_string(),
            "Internal error: worker gone"
        );
    }
}
