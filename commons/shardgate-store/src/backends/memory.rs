use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{StorageBackend, StorageConfig, StorageError, StorageResult, StorageTransaction};

/// In-memory transactional storage.
///
/// Committed state lives behind a single `RwLock`. Isolation comes from a
/// fixed set of lock stripes: a transaction takes the stripe of every key it
/// touches on first access and keeps it until it finishes, so two
/// transactions touching the same key run one after the other.
///
/// A transaction only waits for stripes above every stripe it already holds.
/// A lower stripe is tried without waiting and fails with
/// [`StorageError::LockConflict`] when busy, so waits never form a cycle.
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    data: RwLock<HashMap<Vec<u8>, Bytes>>,
    stripes: Vec<Arc<Mutex<()>>>,
    hasher: std::hash::RandomState,
    config: StorageConfig,
    next_tx_id: AtomicU64,
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl MemoryStorage {
    pub fn new(config: StorageConfig) -> StorageResult<Self> {
        config.validate()?;
        let stripes = (0..config.lock_stripes).map(|_| Arc::new(Mutex::new(()))).collect();
        Ok(Self {
            inner: Arc::new(MemoryInner {
                data: RwLock::new(HashMap::new()),
                stripes,
                hasher: std::hash::RandomState::new(),
                config,
                next_tx_id: AtomicU64::new(1),
            }),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.inner.config
    }
}

impl MemoryInner {
    fn stripe_of(&self, key: &[u8]) -> usize {
        let mut hasher = self.hasher.build_hasher();
        hasher.write(key);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    type Transaction = MemoryTransaction;

    async fn begin_transaction(&self) -> StorageResult<Self::Transaction> {
        let id = self.inner.next_tx_id.fetch_add(1, Ordering::Relaxed);
        Ok(MemoryTransaction {
            id,
            inner: self.inner.clone(),
            held: BTreeMap::new(),
            pending: HashMap::new(),
            state: TxState::Active,
        })
    }

    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        let data = self.inner.data.read().await;
        Ok(data.get(key).cloned())
    }

    async fn count(&self) -> StorageResult<u64> {
        let data = self.inner.data.read().await;
        Ok(data.len() as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Active,
    Committed,
    RolledBack,
}

/// Transaction over [`MemoryStorage`]. Writes are buffered and applied in one
/// step at commit; a `None` entry in the buffer is a pending delete.
pub struct MemoryTransaction {
    id: u64,
    inner: Arc<MemoryInner>,
    held: BTreeMap<usize, OwnedMutexGuard<()>>,
    pending: HashMap<Vec<u8>, Option<Bytes>>,
    state: TxState,
}

impl MemoryTransaction {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn ensure_active(&self) -> StorageResult<()> {
        match self.state {
            TxState::Active => Ok(()),
            TxState::Committed => Err(StorageError::transaction(format!(
                "transaction {} already committed",
                self.id
            ))),
            TxState::RolledBack => Err(StorageError::transaction(format!(
                "transaction {} already rolled back",
                self.id
            ))),
        }
    }

    async fn lock_key(&mut self, key: &[u8]) -> StorageResult<()> {
        let stripe = self.inner.stripe_of(key);
        if self.held.contains_key(&stripe) {
            return Ok(());
        }
        let lock = self.inner.stripes[stripe].clone();
        let highest = self.held.keys().next_back().copied();
        if highest.is_some_and(|highest| stripe < highest) {
            let guard = lock.try_lock_owned().map_err(|_| {
                tracing::debug!(tx = self.id, stripe, "out of order stripe is busy");
                StorageError::LockConflict(stripe)
            })?;
            self.held.insert(stripe, guard);
            return Ok(());
        }

        let timeout = self.inner.config.lock_timeout;
        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => {
                self.held.insert(stripe, guard);
                Ok(())
            }
            Err(_) => {
                tracing::debug!(tx = self.id, stripe, "lock wait exceeded {:?}", timeout);
                Err(StorageError::LockTimeout(timeout))
            }
        }
    }
}

#[async_trait]
impl StorageTransaction for MemoryTransaction {
    async fn get(&mut self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.ensure_active()?;
        self.lock_key(key).await?;
        if let Some(pending) = self.pending.get(key) {
            return Ok(pending.clone());
        }
        let data = self.inner.data.read().await;
        Ok(data.get(key).cloned())
    }

    async fn put(&mut self, key: &[u8], value: Bytes) -> StorageResult<()> {
        self.ensure_active()?;
        self.lock_key(key).await?;
        self.pending.insert(key.to_vec(), Some(value));
        Ok(())
    }

    async fn delete(&mut self, key: &[u8]) -> StorageResult<()> {
        self.ensure_active()?;
        self.lock_key(key).await?;
        self.pending.insert(key.to_vec(), None);
        Ok(())
    }

    async fn commit(mut self) -> StorageResult<()> {
        self.ensure_active()?;
        let pending = std::mem::take(&mut self.pending);
        {
            let mut data = self.inner.data.write().await;
            for (key, value) in pending {
                match value {
                    Some(value) => {
                        data.insert(key, value);
                    }
                    None => {
                        data.remove(&key);
                    }
                }
            }
        }
        self.state = TxState::Committed;
        self.held.clear();
        Ok(())
    }

    async fn rollback(mut self) -> StorageResult<()> {
        self.ensure_active()?;
        self.pending.clear();
        self.state = TxState::RolledBack;
        self.held.clear();
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.state == TxState::Active && !self.pending.is_empty() {
            tracing::debug!(tx = self.id, "discarding {} uncommitted writes", self.pending.len());
        }
    }
}
