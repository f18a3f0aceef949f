//! Holdfast HTTP server.
//!
//! Reads configuration from the environment (and `.env`), connects the
//! selected backend and serves the commerce API until Ctrl+C or SIGTERM.

use anyhow::Context;
use holdfast_commerce::app::{Services, seed_demo_catalog};
use holdfast_commerce::config::{Config, StoreBackend};
use holdfast_commerce::gateway::{HttpFulfillmentGateway, LoggingGateway};
use holdfast_commerce::notifications::LoggingSink;
use holdfast_commerce::server::build_router;
use holdfast_commerce::sweeper::spawn_expiry_sweeper;
use holdfast_core::environment::{Clock, SystemClock};
use holdfast_core::gateway::FulfillmentGateway;
use holdfast_core::store::CommerceStore;
use holdfast_postgres::{PostgresConfig, PostgresStore};
use holdfast_runtime::metrics::MetricsServer;
use holdfast_testing::InMemoryStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Invalid configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("holdfast={},tower_http=info", config.server.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        backend = ?config.storage.backend,
        address = %config.bind_address(),
        reservation_ttl_secs = config.reservations.ttl_secs,
        "Starting Holdfast"
    );

    let metrics = if config.metrics_enabled {
        let mut server = MetricsServer::new();
        server.start().context("Failed to start metrics exporter")?;
        Some(Arc::new(server))
    } else {
        None
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match config.storage.backend {
        StoreBackend::Memory => {
            warn!("Using the in-memory store; data is lost on restart");
            let store = Arc::new(InMemoryStore::new());
            seed_demo_catalog(store.as_ref(), clock.as_ref()).await?;
            run(store, clock, config, metrics).await
        }
        StoreBackend::Postgres => {
            let pg_config = PostgresConfig {
                url: config.storage.database_url.clone(),
                max_connections: config.storage.max_connections,
                connect_timeout: Duration::from_secs(config.storage.connect_timeout),
                statement_timeout: Duration::from_secs(config.storage.statement_timeout),
            };
            info!("Connecting to PostgreSQL...");
            let store = PostgresStore::connect(&pg_config)
                .await
                .context("Failed to connect to PostgreSQL")?;
            store.migrate().await.context("Failed to apply migrations")?;
            info!("PostgreSQL ready");
            run(Arc::new(store), clock, config, metrics).await
        }
    }
}

async fn run<S>(
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: Config,
    metrics: Option<Arc<MetricsServer>>,
) -> anyhow::Result<()>
where
    S: CommerceStore + 'static,
{
    let gateway: Arc<dyn FulfillmentGateway> = match &config.fulfillment.url {
        Some(url) => {
            info!(url = %url, "Fulfillment gateway configured");
            Arc::new(HttpFulfillmentGateway::new(
                url.clone(),
                Duration::from_millis(config.fulfillment.timeout_ms),
            ))
        }
        None => {
            warn!("FULFILLMENT_URL not set, shipment confirmations are only logged");
            Arc::new(LoggingGateway)
        }
    };

    let services = Services::new(store, clock.clone(), gateway, Arc::new(LoggingSink), &config);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let sweeper = spawn_expiry_sweeper(
        services.reservations.clone(),
        clock,
        config.sweep_interval(),
        config.reservations.sweep_batch_size,
        shutdown_rx,
    );

    let app = build_router(services.app_state(metrics));

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, draining background work");
    let _ = shutdown_tx.send(());
    let drain = async {
        if let Err(error) = sweeper.await {
            warn!(error = %error, "Expiry sweeper ended abnormally");
        }
        services.notifier.shutdown().await;
    };
    if tokio::time::timeout(config.shutdown_timeout(), drain).await.is_err() {
        warn!(
            timeout_secs = config.server.shutdown_timeout,
            "Shutdown timed out, pending notifications dropped"
        );
    }

    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
