use std::marker::PhantomData;
use std::sync::Arc;

use shardgate_store::{Collection, StateManager};
use tracing::debug;

use crate::error::ServiceError;
use crate::record::Record;

/// Keyed CRUD over one collection. Every operation runs in its own
/// transaction and commits exactly once; isolation comes from the store.
pub struct RecordService<R> {
    state: Arc<StateManager>,
    collection: String,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> RecordService<R> {
    pub fn new(state: Arc<StateManager>, collection: impl Into<String>) -> Self {
        Self {
            state,
            collection: collection.into(),
            _record: PhantomData,
        }
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    async fn records(&self) -> Result<Collection<R>, ServiceError> {
        Ok(self.state.get_or_add::<R>(&self.collection).await?)
    }

    pub async fn get(&self, id: i32) -> Result<Option<R>, ServiceError> {
        let records = self.records().await?;
        let mut tx = records.begin().await?;
        let found = tx.try_get(&id.to_string()).await?;
        tx.commit().await?;
        Ok(found)
    }

    /// Stores `record` under `id` unless something is already there.
    pub async fn create(&self, id: i32, mut record: R) -> Result<bool, ServiceError> {
        let records = self.records().await?;
        let key = id.to_string();
        let mut tx = records.begin().await?;
        let created = match tx.try_get(&key).await? {
            Some(_) => false,
            None => {
                record.set_id(id);
                tx.set(&key, &record).await?;
                true
            }
        };
        tx.commit().await?;
        debug!(id, created, "create");
        Ok(created)
    }

    /// Overwrites the record under `id` only if one exists.
    pub async fn update(&self, id: i32, mut record: R) -> Result<bool, ServiceError> {
        let records = self.records().await?;
        let key = id.to_string();
        let mut tx = records.begin().await?;
        let updated = match tx.try_get(&key).await? {
            Some(_) => {
                record.set_id(id);
                tx.set(&key, &record).await?;
                true
            }
            None => false,
        };
        tx.commit().await?;
        debug!(id, updated, "update");
        Ok(updated)
    }

    pub async fn delete(&self, id: i32) -> Result<bool, ServiceError> {
        let records = self.records().await?;
        let mut tx = records.begin().await?;
        let removed = tx.try_remove(&id.to_string()).await?.is_some();
        tx.commit().await?;
        debug!(id, removed, "delete");
        Ok(removed)
    }
}
