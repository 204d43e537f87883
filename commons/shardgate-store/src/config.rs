use std::time::Duration;

use crate::{StorageError, StorageResult};

/// Configuration for a storage backend instance.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// How long a transaction waits for a record lock before giving up.
    pub lock_timeout: Duration,
    /// Number of lock stripes keys are hashed onto.
    pub lock_stripes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(4),
            lock_stripes: 64,
        }
    }
}

impl StorageConfig {
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_lock_stripes(mut self, stripes: usize) -> Self {
        self.lock_stripes = stripes;
        self
    }

    pub fn validate(&self) -> StorageResult<()> {
        if self.lock_stripes == 0 {
            return Err(StorageError::configuration(
                "lock_stripes must be greater than zero",
            ));
        }
        if self.lock_timeout.is_zero() {
            return Err(StorageError::configuration(
                "lock_timeout must be greater than zero",
            ));
        }
        Ok(())
    }
}
