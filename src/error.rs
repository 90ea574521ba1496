use thiserror::Error;

/// Result type for coordination operations
pub type Result<T> = std::result::Result<T, CoordinationError>;

/// Errors that can occur in the coordination layer
#[derive(Error, Debug)]
pub enum CoordinationError {
    #[error("Redis error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("timed out acquiring lock '{name}' after {attempts} attempts")]
    LockTimeout { name: String, attempts: u32 },

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Service error: {0}")]
    Service(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
