use async_trait::async_trait;
use bytes::Bytes;

use crate::StorageResult;

/// Core storage backend trait that abstracts the transaction provider
#[async_trait]
pub trait StorageBackend: Send + Sync {
    type Transaction: StorageTransaction;

    /// Begin a new transaction
    async fn begin_transaction(&self) -> StorageResult<Self::Transaction>;

    /// Read the latest committed value of a key outside any transaction
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Number of committed entries
    async fn count(&self) -> StorageResult<u64>;
}

/// Transaction trait for atomic operations.
///
/// Every key touched (read or written) stays isolated from other transactions
/// until `commit` or `rollback`. Dropping an unfinished transaction discards
/// its writes.
///
/// Transactions that touch several keys may fail with a transient lock error
/// instead of waiting when another transaction holds a key they need; the
/// caller drops the transaction and starts over.
#[async_trait]
pub trait StorageTransaction: Send + Sync + Sized {
    /// Get a value by key, observing this transaction's own pending writes
    async fn get(&mut self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Put a key-value pair within the transaction
    async fn put(&mut self, key: &[u8], value: Bytes) -> StorageResult<()>;

    /// Delete a key within the transaction
    async fn delete(&mut self, key: &[u8]) -> StorageResult<()>;

    /// Check if a key exists within the transaction
    async fn exists(&mut self, key: &[u8]) -> StorageResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Commit the transaction
    async fn commit(self) -> StorageResult<()>;

    /// Rollback the transaction
    async fn rollback(self) -> StorageResult<()>;
}
