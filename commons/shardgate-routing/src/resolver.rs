use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{PartitionKey, ResolutionError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaRole {
    #[default]
    Primary,
    Secondary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Base address, e.g. `http://10.0.0.4:8081/app`.
    pub address: String,
    #[serde(default)]
    pub role: ReplicaRole,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, role: ReplicaRole) -> Self {
        Self {
            address: address.into(),
            role,
        }
    }

    pub fn primary(address: impl Into<String>) -> Self {
        Self::new(address, ReplicaRole::Primary)
    }

    pub fn secondary(address: impl Into<String>) -> Self {
        Self::new(address, ReplicaRole::Secondary)
    }
}

/// Inclusive range of partition keys owned by one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange {
    pub low: PartitionKey,
    pub high: PartitionKey,
}

impl KeyRange {
    pub const FULL: KeyRange = KeyRange {
        low: 0,
        high: u64::MAX,
    };

    pub fn contains(&self, key: PartitionKey) -> bool {
        self.low <= key && key <= self.high
    }

    pub fn overlaps(&self, other: &KeyRange) -> bool {
        self.low <= other.high && other.low <= self.high
    }

    pub fn is_full(&self) -> bool {
        *self == Self::FULL
    }

    /// Singleton partitions cover the whole key space and answer keyless
    /// lookups.
    pub fn covers(&self, key: Option<PartitionKey>) -> bool {
        match key {
            Some(key) => self.contains(key),
            None => self.is_full(),
        }
    }
}

/// Replicas of the partition owning a key, as seen at `generation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSet {
    pub endpoints: Vec<Endpoint>,
    pub generation: u64,
    pub range: KeyRange,
}

impl EndpointSet {
    pub fn primary(&self) -> Option<&Endpoint> {
        self.endpoints
            .iter()
            .find(|e| e.role == ReplicaRole::Primary)
    }

    pub fn secondaries(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints
            .iter()
            .filter(|e| e.role == ReplicaRole::Secondary)
    }
}

/// The partitioning substrate that knows where partitions live.
#[async_trait]
pub trait PartitionSource: Send + Sync {
    async fn fetch(
        &self,
        service: &str,
        key: Option<PartitionKey>,
    ) -> Result<EndpointSet, ResolutionError>;
}

/// Cached partitions of one service.
#[derive(Debug, Default)]
struct ServiceEntry {
    /// Bumped by every invalidation. A fetch that started under an older
    /// epoch is returned to its caller but not cached.
    epoch: u64,
    sets: Vec<Arc<EndpointSet>>,
}

impl ServiceEntry {
    fn lookup(&self, key: Option<PartitionKey>) -> Option<Arc<EndpointSet>> {
        self.sets.iter().find(|s| s.range.covers(key)).cloned()
    }
}

/// Resolves `(service, key)` to an [`EndpointSet`], caching one entry per
/// partition range until it is invalidated.
pub struct PartitionResolver {
    source: Arc<dyn PartitionSource>,
    cache: scc::HashMap<String, ServiceEntry>,
}

impl PartitionResolver {
    pub fn new(source: Arc<dyn PartitionSource>) -> Self {
        Self {
            source,
            cache: scc::HashMap::new(),
        }
    }

    pub async fn resolve(
        &self,
        service: &str,
        key: Option<PartitionKey>,
    ) -> Result<Arc<EndpointSet>, ResolutionError> {
        let (cached, epoch) = self
            .cache
            .read_async(service, |_, entry| (entry.lookup(key), entry.epoch))
            .await
            .unwrap_or((None, 0));
        if let Some(cached) = cached {
            return Ok(cached);
        }

        let fetched = self.source.fetch(service, key).await?;
        if fetched.endpoints.is_empty() {
            return Err(ResolutionError::NotFound(format!(
                "service '{service}' has no replicas for the requested partition"
            )));
        }
        debug!(
            service,
            generation = fetched.generation,
            low = fetched.range.low,
            high = fetched.range.high,
            "resolved partition"
        );
        let fetched = Arc::new(fetched);
        let mut entry = self
            .cache
            .entry_async(service.to_string())
            .await
            .or_default();
        let entry = entry.get_mut();
        if entry.epoch == epoch {
            entry.sets.retain(|s| !s.range.overlaps(&fetched.range));
            entry.sets.push(fetched.clone());
        } else {
            debug!(service, "invalidated while fetching, result not cached");
        }
        Ok(fetched)
    }

    /// Drops the cached entry covering `key`. The next `resolve` refetches,
    /// even when a fetch was already in flight.
    pub async fn invalidate(&self, service: &str, key: Option<PartitionKey>) {
        let mut entry = self
            .cache
            .entry_async(service.to_string())
            .await
            .or_default();
        let entry = entry.get_mut();
        entry.epoch += 1;
        entry.sets.retain(|s| !s.range.covers(key));
    }
}
