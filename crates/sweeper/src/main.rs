//! Expiry sweeper entry point.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use reservations::{ExpirySweeper, ReservationConfig, ReservationEngine};
use sqlx::postgres::PgPoolOptions;
use stock_store::PostgresStockStore;
use sweeper::config::Config;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    sweeper::init_tracing(&config);

    // 2. Install Prometheus metrics exporter
    PrometheusBuilder::new()
        .with_http_listener(config.metrics_addr)
        .install()
        .expect("failed to install Prometheus exporter");
    tracing::info!(addr = %config.metrics_addr, "serving Prometheus metrics");

    // 3. Connect and migrate
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to PostgreSQL");
    let store = PostgresStockStore::new(pool);
    store
        .run_migrations()
        .await
        .expect("failed to run migrations");

    // 4. Build the engine and sweeper
    let engine_config = ReservationConfig {
        sweep_batch_size: config.sweep_batch_size,
        ..ReservationConfig::from_env()
    };
    let engine = Arc::new(ReservationEngine::with_config(store, engine_config));
    let sweeper = ExpirySweeper::new(engine);

    // 5. Run until a shutdown signal arrives
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let interval = config.sweep_interval;
    let worker = tokio::spawn(async move { sweeper.run(interval, shutdown_rx).await });

    sweeper::stop_on(sweeper::termination_signal(), shutdown_tx).await;
    worker.await.expect("sweeper task panicked");

    tracing::info!("sweeper shut down gracefully");
}
