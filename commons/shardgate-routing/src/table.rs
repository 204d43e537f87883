use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::{
    Endpoint, EndpointSet, KeyRange, PartitionKey, PartitionSource, ResolutionError, RoutingError,
};

/// How a service splits the key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PartitionScheme {
    Singleton,
    #[serde(rename_all = "camelCase")]
    UniformRange { partition_count: u32 },
}

impl PartitionScheme {
    fn partitions(&self) -> usize {
        match self {
            PartitionScheme::Singleton => 1,
            PartitionScheme::UniformRange { partition_count } => *partition_count as usize,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartitionSpec {
    pub endpoints: Vec<Endpoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceTopology {
    pub scheme: PartitionScheme,
    pub partitions: Vec<PartitionSpec>,
}

impl ServiceTopology {
    fn validate(&self, service: &str) -> Result<usize, RoutingError> {
        let expected = self.scheme.partitions();
        if expected == 0 || self.partitions.len() != expected {
            return Err(RoutingError::InvalidTopology(
                service.to_string(),
                format!("scheme expects {expected} partitions, {} listed", self.partitions.len()),
            ));
        }
        Ok(expected)
    }
}

#[derive(Debug)]
struct PartitionEntry {
    range: KeyRange,
    endpoints: Vec<Endpoint>,
    generation: u64,
}

/// A fixed partition layout per service whose replica lists can be swapped
/// at runtime to model failover.
#[derive(Debug)]
pub struct StaticPartitionTable {
    services: scc::HashMap<String, (PartitionScheme, Vec<PartitionEntry>)>,
    generation: AtomicU64,
}

impl StaticPartitionTable {
    pub fn from_topology(
        topology: BTreeMap<String, ServiceTopology>,
    ) -> Result<Self, RoutingError> {
        let table = StaticPartitionTable {
            services: scc::HashMap::new(),
            generation: AtomicU64::new(1),
        };
        for (service, spec) in topology {
            let expected = spec.validate(&service)?;
            let generation = table.generation.fetch_add(1, Ordering::Relaxed);
            let entries = spec
                .partitions
                .into_iter()
                .enumerate()
                .map(|(index, p)| PartitionEntry {
                    range: partition_range(index, expected),
                    endpoints: p.endpoints,
                    generation,
                })
                .collect();
            info!(service = %service, partitions = expected, "loaded partition layout");
            let _ = table.services.insert(service, (spec.scheme, entries));
        }
        Ok(table)
    }

    /// Replaces the replica list of one partition and returns its new
    /// generation.
    pub async fn update_partition(
        &self,
        service: &str,
        index: usize,
        endpoints: Vec<Endpoint>,
    ) -> Result<u64, RoutingError> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        self.services
            .update_async(service, |_, (_, entries)| {
                entries.get_mut(index).map(|entry| {
                    entry.endpoints = endpoints;
                    entry.generation = generation;
                    generation
                })
            })
            .await
            .ok_or_else(|| RoutingError::UnknownService(service.to_string()))?
            .ok_or_else(|| RoutingError::UnknownPartition(service.to_string(), index))
    }

    /// Applies a reloaded topology to the loaded services and returns how
    /// many partitions changed replicas. Layouts are fixed once loaded, so a
    /// new service or a changed scheme rejects the whole reload.
    pub async fn apply_topology(
        &self,
        topology: BTreeMap<String, ServiceTopology>,
    ) -> Result<usize, RoutingError> {
        let mut changes = Vec::new();
        for (service, spec) in &topology {
            spec.validate(service)?;
            let current = self
                .services
                .read_async(service, |_, (scheme, entries)| {
                    (*scheme, entries.iter().map(|e| e.endpoints.clone()).collect::<Vec<_>>())
                })
                .await
                .ok_or_else(|| RoutingError::UnknownService(service.clone()))?;
            if current.0 != spec.scheme {
                return Err(RoutingError::InvalidTopology(
                    service.clone(),
                    "partition scheme cannot change at runtime".into(),
                ));
            }
            for (index, (old, new)) in current.1.iter().zip(&spec.partitions).enumerate() {
                if *old != new.endpoints {
                    changes.push((service.as_str(), index, new.endpoints.clone()));
                }
            }
        }

        let changed = changes.len();
        for (service, index, endpoints) in changes {
            let generation = self.update_partition(service, index, endpoints).await?;
            info!(
                service,
                partition = index,
                generation,
                "partition replicas replaced"
            );
        }
        Ok(changed)
    }
}

/// Splits the u64 key space into `count` contiguous ranges of equal width.
fn partition_range(index: usize, count: usize) -> KeyRange {
    const SPAN: u128 = 1 << 64;
    let count = count as u128;
    let lower = |i: u128| (i * SPAN).div_ceil(count);
    let index = index as u128;
    KeyRange {
        low: lower(index) as u64,
        high: (lower(index + 1) - 1) as u64,
    }
}

fn partition_index(key: PartitionKey, count: usize) -> usize {
    ((key as u128 * count as u128) >> 64) as usize
}

#[async_trait]
impl PartitionSource for StaticPartitionTable {
    async fn fetch(
        &self,
        service: &str,
        key: Option<PartitionKey>,
    ) -> Result<EndpointSet, ResolutionError> {
        self.services
            .read_async(service, |_, (scheme, entries)| {
                let index = match (scheme, key) {
                    (PartitionScheme::Singleton, _) => 0,
                    (PartitionScheme::UniformRange { .. }, Some(key)) => {
                        partition_index(key, entries.len())
                    }
                    (PartitionScheme::UniformRange { .. }, None) => {
                        return Err(ResolutionError::NotFound(format!(
                            "service '{service}' is partitioned and needs a key"
                        )));
                    }
                };
                let entry = entries.get(index).ok_or_else(|| {
                    ResolutionError::NotFound(format!(
                        "no partition of '{service}' owns key {key:?}"
                    ))
                })?;
                if entry.endpoints.is_empty() {
                    return Err(ResolutionError::NotFound(format!(
                        "partition {index} of '{service}' has no replicas"
                    )));
                }
                Ok(EndpointSet {
                    endpoints: entry.endpoints.clone(),
                    generation: entry.generation,
                    range: entry.range,
                })
            })
            .await
            .unwrap_or_else(|| {
                Err(ResolutionError::NotFound(format!("unknown service '{service}'")))
            })
    }
}
