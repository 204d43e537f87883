use std::time::Duration;

use thiserror::Error;

/// Main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Timed out after {0:?} waiting for a record lock")]
    LockTimeout(Duration),

    #[error("Lock stripe {0} is held by another transaction")]
    LockConflict(usize),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StorageError {
    pub fn serialization<T: ToString>(msg: T) -> Self {
        Self::Serialization(msg.to_string())
    }

    pub fn transaction<T: ToString>(msg: T) -> Self {
        Self::Transaction(msg.to_string())
    }

    pub fn configuration<T: ToString>(msg: T) -> Self {
        Self::Configuration(msg.to_string())
    }

    /// Contention errors clear up on their own; callers may retry them.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::LockTimeout(_) | Self::LockConflict(_))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(value: serde_json::Error) -> Self {
        Self::serialization(value)
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
