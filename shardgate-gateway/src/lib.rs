mod conf;
mod error;
mod forward;
mod handler;
mod route;

pub use conf::Config;
pub use error::GatewayError;
pub use forward::{BODYLESS_METHODS, InboundRequest, RequestForwarder};
pub use handler::{GatewayState, build_router};
pub use route::{GatewayFile, GatewayOptions, RouteOption, RouteSpec};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use shardgate_observability::{HealthRegistry, HealthReporter, TracingConfig, setup_tracing};
use shardgate_routing::{
    ClientSettings, DispatcherProvider, FaultHandler, PartitionResolver, PartitionSource,
    ServicePartitionClient, StaticPartitionTable,
};
use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

impl GatewayState {
    pub fn new(
        config: &Config,
        options: GatewayOptions,
        source: Arc<dyn PartitionSource>,
        shutdown: CancellationToken,
    ) -> Self {
        let health = Arc::new(HealthRegistry::new());
        let reporter: Arc<dyn HealthReporter> = health.clone();
        let client = ServicePartitionClient::new(
            Arc::new(PartitionResolver::new(source)),
            Arc::new(DispatcherProvider::new(ClientSettings::default())),
            FaultHandler::new(config.service_name.clone(), Some(reporter)),
            config.retry_policy(),
        );
        GatewayState {
            options: Arc::new(options),
            client: Arc::new(client),
            forwarder: RequestForwarder,
            health,
            max_payload_bytes: config.max_payload_bytes,
            shutdown,
            topology: None,
        }
    }

    /// Routes and a static partition table, both from the gateway file.
    pub fn from_file(
        config: &Config,
        file: GatewayFile,
        shutdown: CancellationToken,
    ) -> Result<Self, GatewayError> {
        let options = GatewayOptions::from_specs(&file.routes)?;
        let table = Arc::new(StaticPartitionTable::from_topology(file.topology)?);
        let mut state = Self::new(config, options, table.clone(), shutdown);
        state.topology = Some(table);
        Ok(state)
    }
}

/// Re-reads the gateway file and applies its topology to `table`, returning
/// the number of partitions whose replicas changed.
pub async fn reload_topology(
    table: &StaticPartitionTable,
    path: impl AsRef<Path>,
) -> Result<usize, GatewayError> {
    let file = GatewayFile::load(path).await?;
    Ok(table.apply_topology(file.topology).await?)
}

async fn refresh_topology(
    table: Arc<StaticPartitionTable>,
    path: String,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match reload_topology(&table, &path).await {
            Ok(0) => {}
            Ok(changed) => info!(changed, "topology reloaded from {path}"),
            Err(e) => warn!("topology reload failed: {e}"),
        }
    }
}

pub async fn start_server(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    setup_tracing(TracingConfig::from_env("shardgate-gateway", config.log_format.as_deref()))?;

    let file = GatewayFile::load(&config.config_file).await?;
    let shutdown = CancellationToken::new();
    let state = GatewayState::from_file(&config, file, shutdown.clone())?;
    if let (Some(table), Some(every)) = (state.topology.clone(), config.topology_refresh()) {
        info!("refresh topology every {every:?}");
        tokio::spawn(refresh_topology(
            table,
            config.config_file.clone(),
            every,
            shutdown.clone(),
        ));
    }
    let router = build_router(state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.http_port)).await?;
    info!("start gateway on port {:?}", config.http_port);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
