//! Worker entry point.

use commerce_store::PostgresStore;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use worker::{Config, ReservationSweeper};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env().expect("invalid worker configuration");

    // 1. Initialize tracing
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(config.json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!config.json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    // 2. Install Prometheus exporter
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(config.metrics_addr)
        .install()
        .expect("failed to install Prometheus exporter");
    tracing::info!(addr = %config.metrics_addr, "metrics exporter listening");

    // 3. Connect and migrate
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");
    let store = PostgresStore::new(pool);
    store
        .run_migrations()
        .await
        .expect("failed to run migrations");
    tracing::info!("migrations applied");

    // 4. Sweep until shutdown. `PaymentReconciler` needs a payment gateway
    // client, which this binary does not link; hosts that do run it alongside.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = ReservationSweeper::new(store, config.sweep_interval);
    let sweeping = tokio::spawn(async move { sweeper.run(shutdown_rx).await });

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeping.await {
        tracing::error!(error = %e, "sweeper task failed");
    }

    tracing::info!("worker shut down gracefully");
}
