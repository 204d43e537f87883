use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "REPLICA_HTTP_PORT", default = "8081")]
    pub http_port: u16,
    #[envconfig(from = "REPLICA_SERVICE_NAME", default = "shardgate-replica")]
    pub service_name: String,
    /// Name of the record collection; also the first path segment served.
    #[envconfig(from = "REPLICA_COLLECTION", default = "users")]
    pub collection: String,
    #[envconfig(from = "REPLICA_LOCK_TIMEOUT_MS", default = "4000")]
    pub lock_timeout_ms: u64,
    /// Adds `X-Served-By` to every response.
    #[envconfig(from = "REPLICA_DEBUG_HEADERS", default = "false")]
    pub debug_headers: bool,
    #[envconfig(from = "LOG_FORMAT")]
    pub log_format: Option<String>,
}
