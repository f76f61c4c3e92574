//! Common error types for freeplan-keeper components.

use std::fmt;

/// A specialized Result type for process-level operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that end the process before any keeper runs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging error: {0}")]
    Logging(String),
}

impl Error {
    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new logging error.
    pub fn logging(msg: impl fmt::Display) -> Self {
        Error::Logging(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_render_messages() {
        assert_eq!(
            Error::config("mongodb.uri is required").to_string(),
            "Configuration error: mongodb.uri is required"
        );
        assert_eq!(
            Error::logging("subscriber already set").to_string(),
            "Logging error: subscriber already set"
        );
    }
}
