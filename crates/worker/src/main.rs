use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;

use eventhook_core::telemetry::{init_telemetry, TelemetryConfig};
use eventhook_core::{PayloadBuilder, SubscriptionMatcher, SystemTimeSource};
use eventhook_directory::KeycloakDirectory;
use eventhook_storage::PostgresStore;
use eventhook_worker::{
    DeliveryEngine, EventScanner, NotificationDispatcher, ProcessorConfig, WebhookNotifier,
};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; real deployments set the environment directly
    let _ = dotenvy::dotenv();

    // Configure via environment variables:
    // - OTEL_SERVICE_NAME: Service name (default: "eventhook-worker")
    // - OTEL_EXPORTER_OTLP_ENDPOINT: OTLP endpoint (e.g., "http://localhost:4317")
    // - RUST_LOG or LOG_LEVEL: Log filter
    let telemetry_config =
        TelemetryConfig::from_env().with_service_version(env!("CARGO_PKG_VERSION"));
    let _telemetry_guard = init_telemetry(telemetry_config);

    tracing::info!("eventhook-worker starting...");

    let config = ProcessorConfig::from_env().context("Invalid configuration")?;

    tracing::info!(
        time_zone = %config.zone.tz(),
        start_interval_ms = config.scanner.start_interval.as_millis() as u64,
        end_interval_ms = config.scanner.end_interval.as_millis() as u64,
        max_concurrency = config.dispatcher.max_concurrency,
        "Loaded configuration"
    );

    let store = Arc::new(
        PostgresStore::connect(
            &config.database_url,
            config.database_max_connections,
            config.zone,
        )
        .await
        .context("Failed to connect to the database")?,
    );
    if config.run_migrations {
        store.migrate().await.context("Failed to run migrations")?;
    }

    let directory = Arc::new(
        KeycloakDirectory::new(config.keycloak.clone()).context("Failed to create directory client")?,
    );
    let clock = Arc::new(SystemTimeSource::new(config.zone));

    let notifier = Arc::new(WebhookNotifier::new(
        SubscriptionMatcher::new(store.clone()),
        PayloadBuilder::new(directory, store.clone(), store.clone(), clock.clone()),
        DeliveryEngine::new(&config.delivery).context("Failed to create HTTP client")?,
    ));

    let dispatcher = Arc::new(NotificationDispatcher::start(
        notifier,
        config.dispatcher.clone(),
    ));

    let scanner = Arc::new(EventScanner::new(
        store,
        dispatcher.clone(),
        clock,
        config.scanner.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scanner_handle = tokio::spawn(scanner.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Received shutdown signal");

    // Let the current cycles finish, then drain what they dispatched
    let _ = shutdown_tx.send(true);
    if let Err(e) = scanner_handle.await {
        tracing::error!(error = %e, "Scanner task failed");
    }
    if let Err(e) = dispatcher.shutdown().await {
        tracing::warn!(error = %e, "Dispatcher did not drain cleanly");
    }

    tracing::info!("Worker shutdown complete");
    Ok(())
}
