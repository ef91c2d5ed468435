//! Error types for courier.

use thiserror::Error;

/// Result type alias using courier's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for courier operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_job() {
        let err = Error::Job("claim failed".to_string());
        assert_eq!(err.to_string(), "Job error: claim failed");
    }

    #[test]
    fn test_error_display_config() {
        let err = Error::Config("SOCKETS_PORT is not a number".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: SOCKETS_PORT is not a number"
        );
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
