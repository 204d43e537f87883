mod conf;
mod error;
mod handler;
mod record;
mod service;

pub use conf::Config;
pub use error::ServiceError;
pub use handler::{ReplicaState, build_router};
pub use record::{Record, UserInfo};
pub use service::RecordService;

use std::sync::Arc;
use std::time::Duration;

use shardgate_observability::{HealthRegistry, TracingConfig, setup_tracing};
use shardgate_store::{StateManager, StorageConfig, StorageError};
use tokio::net::TcpListener;
use tracing::info;

impl ReplicaState {
    pub fn from_config(config: &Config) -> Result<Self, StorageError> {
        let storage = StorageConfig::default()
            .with_lock_timeout(Duration::from_millis(config.lock_timeout_ms));
        let state = Arc::new(StateManager::new(storage)?);
        Ok(ReplicaState {
            records: Arc::new(RecordService::new(state, config.collection.clone())),
            health: Arc::new(HealthRegistry::new()),
            service_name: config.service_name.clone(),
            debug_headers: config.debug_headers,
        })
    }
}

pub async fn start_server(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    setup_tracing(TracingConfig::from_env(
        "shardgate-replica",
        config.log_format.as_deref(),
    ))?;

    let state = ReplicaState::from_config(&config)?;
    let router = build_router(state);
    let listener =
        TcpListener::bind(format!("0.0.0.0:{}", config.http_port)).await?;
    info!(
        service = %config.service_name,
        collection = %config.collection,
        "start replica on port {:?}",
        config.http_port
    );
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
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
