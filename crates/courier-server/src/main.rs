//! courier-server - notification delivery worker and transport server

mod config;
mod transport;

use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use courier_db::{log_pool_metrics, Database, PgJobQueue, PgNotificationRepository};
use courier_delivery::{
    ConnectionRegistry, DeliveryEngine, DeliveryWorker, NotificationDispatcher, WorkerHandle,
};

use config::ServerConfig;
use transport::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env().context("invalid configuration")?;

    // Startup failures here are fatal by design: a worker that cannot reach
    // its queue or bind its port has nothing to do.
    let db = Database::connect(&config.database_url)
        .await
        .context("cannot reach database")?;
    db.migrate().await.context("migration failed")?;

    // Periodic pool health logging.
    let metrics_pool = db.pool.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            log_pool_metrics(&metrics_pool);
        }
    });

    let registry = Arc::new(ConnectionRegistry::new());
    let store = Arc::new(PgNotificationRepository::new(db.pool.clone()));
    let queue = Arc::new(PgJobQueue::new(db.pool.clone()));
    let engine = Arc::new(DeliveryEngine::new(store, registry.clone()));
    let dispatcher = Arc::new(NotificationDispatcher::new(queue.clone()));

    let worker = DeliveryWorker::new(queue.clone(), engine.clone(), config.worker.clone())
        .with_wake(queue.job_notify());
    let worker_handle = worker.start();

    let state = AppState {
        engine,
        registry,
        dispatcher,
        connections: Arc::new(AtomicUsize::new(0)),
    };

    let app = Router::new()
        .route("/health", get(transport::health))
        .route("/ws", get(transport::ws_handler))
        .route(
            "/api/v1/notifications/stream",
            get(transport::notification_stream),
        )
        .route(
            "/api/v1/notifications/:id/read",
            post(transport::set_read_status),
        )
        .route("/api/v1/dispatch", post(transport::dispatch))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.sockets_port));
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("cannot bind transport port")?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(worker_handle))
        .await?;

    Ok(())
}

/// Wait for ctrl-c, then stop the delivery worker before the transport
/// drains.
async fn shutdown_signal(worker: WorkerHandle) {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received");
    if let Err(e) = worker.shutdown().await {
        warn!(error = %e, "Worker shutdown signal failed");
    }
}
