// Agentmesh Registry server
// Decision: One process hosts the HTTP API and the health monitor over a shared store

use std::sync::Arc;

use agentmesh_core::telemetry::{init_telemetry, TelemetryConfig};
use agentmesh_registry::config::RegistryConfig;
use agentmesh_registry::monitor::HealthMonitor;
use agentmesh_registry::{build_router, storage, RegistryService};
use anyhow::{Context, Result};
use mockable::{Clock, DefaultClock};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Configure via environment variables:
    // - RUST_LOG: Log filter (default: "agentmesh_registry=debug,agentmesh_core=info,tower_http=debug")
    // - LOG_FORMAT: "text" or "json"
    let mut telemetry_config = TelemetryConfig::from_env().with_version(env!("CARGO_PKG_VERSION"));
    if telemetry_config.log_filter.is_none() {
        telemetry_config.log_filter =
            Some("agentmesh_registry=debug,agentmesh_core=info,tower_http=debug".to_string());
    }
    init_telemetry(telemetry_config);

    tracing::info!("agentmesh-registry starting...");

    let config = RegistryConfig::from_env().context("Invalid registry configuration")?;

    let store = storage::connect(&config.database_url)
        .await
        .context("Failed to connect to registry storage")?;
    tracing::info!("Connected to registry storage");

    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(DefaultClock);

    let service = Arc::new(
        RegistryService::new(store.clone(), clock.clone(), config.threshold_policy())
            .with_retry_policy(config.retry_policy()),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = HealthMonitor::new(store, clock, config.monitor_config())
        .with_retry_policy(config.retry_policy());
    tracing::info!(
        interval_secs = config.health_check_interval.as_secs(),
        timeout_secs = config.default_thresholds.timeout_threshold,
        eviction_secs = config.default_thresholds.eviction_threshold,
        "Starting health monitor"
    );
    let monitor_handle = tokio::spawn(monitor.run(shutdown_rx));

    let app = build_router(service, &config.router_options());

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    tracing::info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = monitor_handle.await {
        tracing::error!(error = %e, "Health monitor task failed");
    }

    tracing::info!("Registry shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Received shutdown signal");
}
