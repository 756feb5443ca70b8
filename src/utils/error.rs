use thiserror::Error;

pub type Result<T> = std::result::Result<T, RippleError>;

#[derive(Error, Debug)]
pub enum RippleError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Size mismatch: accumulated offset {offset} != file size {size}")]
    SizeMismatch { offset: u64, size: u64 },

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

impl RippleError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RippleError::NotFound(_))
    }
}

impl From<std::io::Error> for RippleError {
    fn from(err: std::io::Error) -> Self {
        RippleError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for RippleError {
    fn from(err: serde_json::Error) -> Self {
        RippleError::SerializationError(err.to_string())
    }
}

impl From<sled::Error> for RippleError {
    fn from(err: sled::Error) -> Self {
        RippleError::StorageError(err.to_string())
    }
}
