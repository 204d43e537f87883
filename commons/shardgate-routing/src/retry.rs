use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rand::seq::IndexedRandom;
use serde::Deserialize;
use shardgate_observability::{HealthReport, HealthReporter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{
    DispatchError, Dispatcher, DispatcherProvider, Endpoint, EndpointSet, Fault, PartitionKey,
    PartitionResolver, ResolutionError, RetryError,
};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_factor: f64,
    pub max_backoff: Duration,
    pub jitter: bool,
    /// Upper bound for a single attempt, including reading response headers.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(25),
            backoff_factor: 2.0,
            max_backoff: Duration::from_secs(1),
            jitter: true,
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let base = self.initial_backoff.as_millis() as f64 * self.backoff_factor.powi(exp);
        let mut delay = base.min(self.max_backoff.as_millis() as f64);
        if self.jitter {
            delay *= rand::rng().random_range(0.5..1.5);
        }
        Duration::from_millis(delay.round().max(0.0) as u64)
    }
}

/// Which replica of the resolved set an attempt targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetReplicaSelector {
    /// The primary, or the first endpoint when none is marked primary.
    #[default]
    Default,
    RandomReplica,
    RandomSecondary,
}

impl TargetReplicaSelector {
    pub fn select<'a>(&self, set: &'a EndpointSet) -> Option<&'a Endpoint> {
        match self {
            TargetReplicaSelector::Default => set.primary().or_else(|| set.endpoints.first()),
            TargetReplicaSelector::RandomReplica => set.endpoints.choose(&mut rand::rng()),
            TargetReplicaSelector::RandomSecondary => {
                let secondaries: Vec<&Endpoint> = set.secondaries().collect();
                secondaries.choose(&mut rand::rng()).copied()
            }
        }
    }
}

/// Reports faults that end a request without retry. Reports are raised on
/// behalf of the hosting service; the routed service becomes the source.
#[derive(Clone)]
pub struct FaultHandler {
    service: String,
    reporter: Option<Arc<dyn HealthReporter>>,
}

impl FaultHandler {
    pub fn new(service: impl Into<String>, reporter: Option<Arc<dyn HealthReporter>>) -> Self {
        Self {
            service: service.into(),
            reporter,
        }
    }

    pub fn report_fatal(&self, target: &str, fault: &Fault) {
        error!(service = %self.service, target, "fatal fault: {fault}");
        if let Some(reporter) = &self.reporter {
            reporter.report(HealthReport::error(
                self.service.as_str(),
                target,
                fault.to_string(),
            ));
        }
    }
}

impl std::fmt::Debug for FaultHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultHandler")
            .field("service", &self.service)
            .field("reporter", &self.reporter.is_some())
            .finish()
    }
}

/// Where a request goes: a service, the key of the partition within it, and
/// which replica of that partition to use.
#[derive(Debug, Clone, Copy)]
pub struct PartitionTarget<'a> {
    pub service: &'a str,
    pub key: Option<PartitionKey>,
    pub selector: TargetReplicaSelector,
}

/// Runs an operation against the replica owning a partition, re-resolving
/// and retrying on transient faults.
pub struct ServicePartitionClient {
    resolver: Arc<PartitionResolver>,
    dispatchers: Arc<DispatcherProvider>,
    faults: FaultHandler,
    policy: RetryPolicy,
}

impl ServicePartitionClient {
    pub fn new(
        resolver: Arc<PartitionResolver>,
        dispatchers: Arc<DispatcherProvider>,
        faults: FaultHandler,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            resolver,
            dispatchers,
            faults,
            policy,
        }
    }

    pub async fn invoke_with_retry<T, F, Fut>(
        &self,
        target: PartitionTarget<'_>,
        cancel: Option<&CancellationToken>,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut(Arc<Dispatcher>) -> Fut,
        Fut: Future<Output = Result<T, DispatchError>>,
    {
        let cancel = cancel.cloned().unwrap_or_default();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut resolved = Resolved::default();
        let mut last = None;

        for attempt in 1..=max_attempts {
            let fault = match self.attempt(&target, &mut resolved, &cancel, &mut op).await {
                Ok(value) => return Ok(value),
                Err(fault) => fault,
            };

            if !fault.is_transient() {
                self.faults.report_fatal(target.service, &fault);
                return Err(RetryError::Fatal(fault));
            }

            warn!(
                service = target.service,
                attempt,
                max_attempts,
                "transient fault: {fault}"
            );
            self.resolver.invalidate(target.service, target.key).await;
            resolved.retire();
            last = Some(fault);

            if attempt < max_attempts {
                let delay = self.policy.delay_for_attempt(attempt);
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let fault = Fault::Dispatch(DispatchError::Cancelled);
                        self.faults.report_fatal(target.service, &fault);
                        return Err(RetryError::Fatal(fault));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        let last = last.unwrap_or_else(|| {
            Fault::Resolution(ResolutionError::Unavailable("no attempt was made".into()))
        });
        Err(RetryError::Exhausted {
            attempts: max_attempts,
            last,
        })
    }

    async fn attempt<T, F, Fut>(
        &self,
        target: &PartitionTarget<'_>,
        resolved: &mut Resolved,
        cancel: &CancellationToken,
        op: &mut F,
    ) -> Result<T, Fault>
    where
        F: FnMut(Arc<Dispatcher>) -> Fut,
        Fut: Future<Output = Result<T, DispatchError>>,
    {
        if cancel.is_cancelled() {
            return Err(DispatchError::Cancelled.into());
        }
        let set = match resolved.current.clone() {
            Some(set) => set,
            None => {
                let set = self.resolver.resolve(target.service, target.key).await?;
                if let Some(retired) = resolved.retired.take() {
                    let departed = retired
                        .endpoints
                        .iter()
                        .filter(|old| !set.endpoints.iter().any(|e| e.address == old.address))
                        .map(|old| old.address.as_str());
                    self.dispatchers.evict(departed).await;
                }
                resolved.current = Some(set.clone());
                set
            }
        };
        let endpoint = target.selector.select(&set).ok_or_else(|| {
            ResolutionError::NotFound(format!(
                "no replica of '{}' matches selector {:?}",
                target.service, target.selector
            ))
        })?;
        let dispatcher = self.dispatchers.acquire(&endpoint.address).await?;
        debug!(
            service = target.service,
            endpoint = %endpoint.address,
            generation = set.generation,
            "dispatching attempt"
        );

        let timeout = self.policy.attempt_timeout;
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(DispatchError::Cancelled),
            outcome = tokio::time::timeout(timeout, op(dispatcher.clone())) => {
                outcome.unwrap_or(Err(DispatchError::Timeout(timeout)))
            }
        };
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                self.dispatchers.abort(&dispatcher).await;
                Err(err.into())
            }
        }
    }
}

/// The endpoint set of the current attempt sequence, plus the one it
/// replaced so replicas that left the partition can be evicted.
#[derive(Default)]
struct Resolved {
    current: Option<Arc<EndpointSet>>,
    retired: Option<Arc<EndpointSet>>,
}

impl Resolved {
    fn retire(&mut self) {
        if let Some(current) = self.current.take() {
            self.retired = Some(current);
        }
    }
}
