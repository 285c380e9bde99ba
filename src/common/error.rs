//! Error types for the application.

use thiserror::Error;

/// Configuration-related errors.
///
/// These are fatal at startup; each variant maps to a distinct process
/// exit code so supervisors can tell the failures apart.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment is missing $PORT")]
    MissingPort,

    #[error("Environment variable $PORT is not a valid port: {value}")]
    InvalidPort { value: String },

    #[error("Unable to connect to database: {message}")]
    Database { message: String },
}

impl ConfigError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            ConfigError::MissingPort | ConfigError::InvalidPort { .. } => 1,
            ConfigError::Database { .. } => 4,
        }
    }
}

/// Errors from the chat platform's Web API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No credential for workspace '{workspace}'")]
    NoCredential { workspace: String },

    #[error("API method '{method}' failed: {error}")]
    Platform { method: String, error: String },

    #[error("Malformed response from '{method}': {message}")]
    MalformedResponse { method: String, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors from the correlation store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type alias for Web API operations.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Result type alias for correlation store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
