use std::time::Duration;

use envconfig::Envconfig;
use shardgate_routing::RetryPolicy;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "GATEWAY_HTTP_PORT", default = "8080")]
    pub http_port: u16,
    /// Process-wide identity that fatal-fault health reports are raised under.
    #[envconfig(from = "GATEWAY_SERVICE_NAME", default = "shardgate-gateway")]
    pub service_name: String,
    /// JSON file with the route table and partition topology.
    #[envconfig(from = "GATEWAY_CONFIG_FILE", default = "gateway.json")]
    pub config_file: String,
    #[envconfig(from = "REQUEST_TIMEOUT_MS", default = "30000")]
    pub request_timeout_ms: u64,
    #[envconfig(from = "MAX_PAYLOAD_BYTES", default = "4194304")]
    pub max_payload_bytes: usize,
    #[envconfig(from = "RETRY_ATTEMPTS", default = "5")]
    pub retry_attempts: u32,
    #[envconfig(from = "RETRY_BACKOFF_MS", default = "25")]
    pub retry_backoff_ms: u64,
    #[envconfig(from = "RETRY_MAX_BACKOFF_MS", default = "1000")]
    pub retry_max_backoff_ms: u64,
    /// Interval for re-reading the topology from the config file; 0 disables.
    #[envconfig(from = "GATEWAY_TOPOLOGY_REFRESH_MS", default = "0")]
    pub topology_refresh_ms: u64,
    // "json" or "plain"/"text"
    #[envconfig(from = "LOG_FORMAT")]
    pub log_format: Option<String>,
}

impl Config {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts.max(1),
            initial_backoff: Duration::from_millis(self.retry_backoff_ms),
            max_backoff: Duration::from_millis(self.retry_max_backoff_ms),
            attempt_timeout: Duration::from_millis(self.request_timeout_ms),
            ..Default::default()
        }
    }

    pub fn topology_refresh(&self) -> Option<Duration> {
        (self.topology_refresh_ms > 0).then(|| Duration::from_millis(self.topology_refresh_ms))
    }
}
