use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use shardgate_routing::{KeyStrategy, PartitionKeySelector, ServiceTopology, TargetReplicaSelector};
use tracing::info;

use crate::error::GatewayError;

/// On-disk gateway configuration: the route table plus the partition layout
/// of every service it routes to.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayFile {
    pub routes: Vec<RouteSpec>,
    #[serde(default)]
    pub topology: BTreeMap<String, ServiceTopology>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    pub path: String,
    pub service_uri: String,
    #[serde(default)]
    pub key_strategy: KeyStrategy,
    #[serde(default)]
    pub target_replica_selector: TargetReplicaSelector,
}

impl GatewayFile {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let raw = tokio::fs::read(path).await.map_err(|e| {
            GatewayError::Config(format!("read {}: {e}", path.display()))
        })?;
        serde_json::from_slice(&raw).map_err(|e| {
            GatewayError::Config(format!("parse {}: {e}", path.display()))
        })
    }
}

/// One entry of the route table: requests under `prefix` go to `service`.
#[derive(Debug, Clone)]
pub struct RouteOption {
    pub prefix: String,
    pub service: String,
    pub key: PartitionKeySelector,
    pub selector: TargetReplicaSelector,
}

impl RouteOption {
    pub fn new(
        prefix: &str,
        service: impl Into<String>,
        key: PartitionKeySelector,
        selector: TargetReplicaSelector,
    ) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            service: service.into(),
            key,
            selector,
        }
    }

    /// The path left after stripping this route's prefix, if the prefix
    /// matches on a segment boundary.
    fn strip<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(self.prefix.as_str())?;
        (rest.is_empty() || rest.starts_with('/')).then_some(rest)
    }
}

/// Immutable route table, built once at startup.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    routes: Vec<RouteOption>,
}

impl GatewayOptions {
    pub fn new(mut routes: Vec<RouteOption>) -> Result<Self, GatewayError> {
        for route in &routes {
            if !route.prefix.is_empty() && !route.prefix.starts_with('/') {
                return Err(GatewayError::Config(format!(
                    "route prefix '{}' must start with '/'",
                    route.prefix
                )));
            }
        }
        // longest prefix wins
        routes.sort_by(|a, b| {
            b.prefix
                .len()
                .cmp(&a.prefix.len())
                .then_with(|| a.prefix.cmp(&b.prefix))
        });
        if let Some(pair) =
            routes.windows(2).find(|pair| pair[0].prefix == pair[1].prefix)
        {
            return Err(GatewayError::Config(format!(
                "duplicate route prefix '{}'",
                pair[0].prefix
            )));
        }
        Ok(Self { routes })
    }

    pub fn from_specs(specs: &[RouteSpec]) -> Result<Self, GatewayError> {
        let routes = specs
            .iter()
            .map(|spec| {
                info!(
                    prefix = %spec.path,
                    service = %spec.service_uri,
                    "registered route"
                );
                RouteOption::new(
                    &spec.path,
                    spec.service_uri.clone(),
                    spec.key_strategy.selector(),
                    spec.target_replica_selector,
                )
            })
            .collect();
        Self::new(routes)
    }

    pub fn match_route<'a>(&self, path: &'a str) -> Option<(&RouteOption, &'a str)> {
        self.routes
            .iter()
            .find_map(|route| route.strip(path).map(|rest| (route, rest)))
    }

    pub fn routes(&self) -> &[RouteOption] {
        &self.routes
    }
}
