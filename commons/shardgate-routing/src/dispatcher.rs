use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use hashbrown::HashMap;
use reqwest::{Client, Url};
use tokio::sync::RwLock;
use tracing::debug;

use crate::DispatchError;

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub connect_timeout: Duration,
    pub tcp_keepalive: Duration,
    pub pool_idle_timeout: Duration,
    pub pool_max_idle_per_host: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            tcp_keepalive: Duration::from_secs(60),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 10,
        }
    }
}

/// An HTTP client bound to one replica base address.
#[derive(Debug)]
pub struct Dispatcher {
    id: u64,
    endpoint: String,
    base: Url,
    client: Client,
    aborted: AtomicBool,
}

impl Dispatcher {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The endpoint address this dispatcher was created for.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn base_address(&self) -> &Url {
        &self.base
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }
}

/// Hands out cached [`Dispatcher`]s keyed by endpoint address.
#[derive(Debug, Default)]
pub struct DispatcherProvider {
    cache: RwLock<HashMap<String, Arc<Dispatcher>>>,
    settings: ClientSettings,
    next_id: AtomicU64,
}

impl DispatcherProvider {
    pub fn new(settings: ClientSettings) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            settings,
            next_id: AtomicU64::new(0),
        }
    }

    /// Returns the cached dispatcher for `endpoint` if it still validates,
    /// otherwise creates and caches a new one.
    pub async fn acquire(&self, endpoint: &str) -> Result<Arc<Dispatcher>, DispatchError> {
        let cache = self.cache.read().await;
        if let Some(dispatcher) = cache.get(endpoint) {
            if self.validate_for(endpoint, dispatcher) {
                return Ok(dispatcher.clone());
            }
        }
        drop(cache);

        let mut cache = self.cache.write().await;
        if let Some(dispatcher) = cache.get(endpoint) {
            if self.validate_for(endpoint, dispatcher) {
                return Ok(dispatcher.clone());
            }
        }
        let dispatcher = Arc::new(self.create(endpoint)?);
        debug!(endpoint, dispatcher = dispatcher.id, "created dispatcher");
        cache.insert(endpoint.to_string(), dispatcher.clone());
        Ok(dispatcher)
    }

    /// General validity: not aborted and bound to an addressable host.
    pub fn validate(&self, dispatcher: &Dispatcher) -> bool {
        !dispatcher.is_aborted() && dispatcher.base.host_str().is_some()
    }

    pub fn validate_for(&self, endpoint: &str, dispatcher: &Dispatcher) -> bool {
        self.validate(dispatcher) && dispatcher.endpoint == endpoint
    }

    /// Marks the dispatcher unusable and evicts it if it is still the cached
    /// instance. Calling it again is a no-op.
    pub async fn abort(&self, dispatcher: &Arc<Dispatcher>) {
        if dispatcher.aborted.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut cache = self.cache.write().await;
        let is_cached = cache
            .get(&dispatcher.endpoint)
            .is_some_and(|cached| Arc::ptr_eq(cached, dispatcher));
        if is_cached {
            cache.remove(&dispatcher.endpoint);
        }
        debug!(
            endpoint = %dispatcher.endpoint,
            dispatcher = dispatcher.id,
            evicted = is_cached,
            "aborted dispatcher"
        );
    }

    /// Drops cached dispatchers for endpoints that left their partition.
    /// Handles already held by callers stay usable.
    pub async fn evict<'a>(&self, endpoints: impl IntoIterator<Item = &'a str>) -> usize {
        let mut cache = self.cache.write().await;
        let mut evicted = 0;
        for endpoint in endpoints {
            if let Some(dispatcher) = cache.remove(endpoint) {
                debug!(
                    endpoint,
                    dispatcher = dispatcher.id,
                    "evicted departed dispatcher"
                );
                evicted += 1;
            }
        }
        evicted
    }

    fn create(&self, endpoint: &str) -> Result<Dispatcher, DispatchError> {
        let base = Url::parse(endpoint)
            .map_err(|e| DispatchError::InvalidEndpoint(endpoint.to_string(), e.to_string()))?;
        if base.host_str().is_none() {
            return Err(DispatchError::InvalidEndpoint(
                endpoint.to_string(),
                "missing host".into(),
            ));
        }
        let client = Client::builder()
            .connect_timeout(self.settings.connect_timeout)
            .tcp_nodelay(true)
            .tcp_keepalive(Some(self.settings.tcp_keepalive))
            .pool_idle_timeout(self.settings.pool_idle_timeout)
            .pool_max_idle_per_host(self.settings.pool_max_idle_per_host)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| DispatchError::InvalidRequest(e.to_string()))?;
        Ok(Dispatcher {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            endpoint: endpoint.to_string(),
            base,
            client,
            aborted: AtomicBool::new(false),
        })
    }
}
