mod config;
mod discovery;
mod error;
mod health;
mod ingestion_loop;
mod metrics;
mod multipart;
mod mutation;
mod quarantine;
mod readiness;
mod settings;
mod study_processor;
mod token_cache;
mod uploader;
mod worker_pool;

pub use config::load_settings;
pub use error::{ConfigError, FatalProcessorError, InstanceError, UploadError};
pub use readiness::{ReadinessTracker, ReadyStudy};
pub use settings::{IngestSettings, LogFormat};
pub use study_processor::{Outcome, StudyProcessor};
pub use token_cache::TokenCache;
pub use uploader::Uploader;

use health::HealthState;
use std::sync::Arc;

/// Initialize tracing according to `settings`, then run the ingestion loop
/// and the metrics/health HTTP surfaces until a shutdown signal arrives.
pub async fn run(settings: IngestSettings) -> anyhow::Result<()> {
    let tokens = Arc::new(TokenCache::new(
        settings.keycloak_url.clone(),
        settings.keycloak_realm.clone(),
        settings.keycloak_client_id.clone(),
        settings.keycloak_client_secret.clone(),
    ));
    let uploader = Arc::new(Uploader::new(
        &settings.orthanc_url,
        tokens,
        settings.max_retries,
        settings.retry_delay,
    ));
    let processor = Arc::new(StudyProcessor::new(
        uploader,
        settings.processed_path.clone(),
        settings.failed_path.clone(),
    ));

    let metrics_addr = std::net::SocketAddr::from(([0, 0, 0, 0], settings.metrics_port));
    metrics::install(metrics_addr)?;

    let health_state = HealthState::new();
    // the Prometheus exporter owns `metrics_port` with its own listener, so
    // the health endpoint binds the adjacent port.
    let health_addr = std::net::SocketAddr::from(([0, 0, 0, 0], settings.metrics_port + 1));
    let health_handle = tokio::spawn(health::serve(health_addr, health_state.clone()));

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let shutdown_signal = tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    let loop_result = ingestion_loop::run(
        settings.inbox_path,
        settings.cooldown_seconds,
        processor,
        settings.max_concurrent,
        health_state,
        shutdown_rx,
    )
    .await;

    shutdown_signal.abort();
    health_handle.abort();
    loop_result
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
