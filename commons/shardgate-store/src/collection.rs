use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use crate::{MemoryStorage, StorageBackend, StorageResult, StorageTransaction};

/// A named keyed collection of JSON encoded values.
pub struct Collection<V, B = MemoryStorage> {
    name: Arc<str>,
    backend: Arc<B>,
    _value: PhantomData<fn() -> V>,
}

impl<V, B> Clone for Collection<V, B> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            backend: self.backend.clone(),
            _value: PhantomData,
        }
    }
}

impl<V, B> std::fmt::Debug for Collection<V, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection").field("name", &self.name).finish()
    }
}

impl<V, B> Collection<V, B>
where
    V: Serialize + DeserializeOwned,
    B: StorageBackend,
{
    pub fn new(name: impl Into<Arc<str>>, backend: Arc<B>) -> Self {
        Self {
            name: name.into(),
            backend,
            _value: PhantomData,
        }
    }

    pub async fn begin(&self) -> StorageResult<TypedTransaction<V, B::Transaction>> {
        let inner = self.backend.begin_transaction().await?;
        Ok(TypedTransaction {
            inner,
            _value: PhantomData,
        })
    }
}

/// Typed view over a backend transaction.
pub struct TypedTransaction<V, T> {
    inner: T,
    _value: PhantomData<fn() -> V>,
}

impl<V, T> TypedTransaction<V, T>
where
    V: Serialize + DeserializeOwned,
    T: StorageTransaction,
{
    pub async fn try_get(&mut self, key: &str) -> StorageResult<Option<V>> {
        match self.inner.get(key.as_bytes()).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set(&mut self, key: &str, value: &V) -> StorageResult<()> {
        let raw = serde_json::to_vec(value)?;
        self.inner.put(key.as_bytes(), Bytes::from(raw)).await
    }

    /// Removes `key` and returns what was stored, if anything.
    pub async fn try_remove(&mut self, key: &str) -> StorageResult<Option<V>> {
        let existing = self.try_get(key).await?;
        if existing.is_some() {
            self.inner.delete(key.as_bytes()).await?;
        }
        Ok(existing)
    }

    pub async fn commit(self) -> StorageResult<()> {
        self.inner.commit().await
    }
}
