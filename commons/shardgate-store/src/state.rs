use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};

use crate::{Collection, MemoryStorage, StorageConfig, StorageResult};

/// Owns the named collections of one replica.
#[derive(Debug)]
pub struct StateManager {
    config: StorageConfig,
    collections: scc::HashMap<String, Arc<MemoryStorage>>,
}

impl StateManager {
    pub fn new(config: StorageConfig) -> StorageResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            collections: scc::HashMap::new(),
        })
    }

    /// Returns the collection called `name`, creating it on first use.
    /// Concurrent callers with the same name share one backing store.
    pub async fn get_or_add<V>(&self, name: &str) -> StorageResult<Collection<V>>
    where
        V: Serialize + DeserializeOwned,
    {
        if let Some(backend) = self.collections.read_async(name, |_, b| b.clone()).await {
            return Ok(Collection::new(name, backend));
        }
        let fresh = Arc::new(MemoryStorage::new(self.config.clone())?);
        let backend = self
            .collections
            .entry_async(name.to_string())
            .await
            .or_insert(fresh)
            .get()
            .clone();
        tracing::debug!(collection = name, "collection ready");
        Ok(Collection::new(name, backend))
    }
}
