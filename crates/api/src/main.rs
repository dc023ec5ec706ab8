//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use api::{Services, Stores};
use common::MetricsTelemetry;
use event_bus::InMemoryEventBus;
use payments::SimulatedChargeGateway;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

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

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");
    api::describe_metrics();

    // 3. Open the stores
    let stores = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .expect("failed to connect to database");
            sqlx::migrate!("../../migrations")
                .run(&pool)
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL stores");
            Stores::postgres(pool)
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory stores");
            Stores::in_memory()
        }
    };

    // 4. Compose the services over the in-process bus
    let services = Services::build(
        &config,
        stores,
        Arc::new(InMemoryEventBus::with_partitions(config.bus_partitions)),
        Arc::new(SimulatedChargeGateway::new(config.payment_success_rate)),
        Arc::new(MetricsTelemetry),
    );
    services
        .seed_inventory(&config.inventory_seed)
        .await
        .expect("failed to seed inventory");
    let workers = services.start().await.expect("failed to start consumers");

    // 5. Build the application
    let app = api::create_app(services.state.clone(), metrics_handle);

    // 6. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    for worker in workers {
        worker.abort();
    }
    tracing::info!("server shut down gracefully");
}
